use crate::{ByteSize, Config, Error, Parity, Result, StopBits};
use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    fcntl::{self, FcntlArg, FlockArg, OFlag},
    sys::{
        stat::Mode,
        termios::{
            self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
            SpecialCharacterIndices::*,
        },
    },
    unistd,
};
use std::{
    io,
    os::unix::prelude::RawFd,
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

const CLOSED: RawFd = -1;

const BAUD_RATES: &[(u32, BaudRate)] = &[
    (50, BaudRate::B50),
    (75, BaudRate::B75),
    (110, BaudRate::B110),
    (134, BaudRate::B134),
    (150, BaudRate::B150),
    (200, BaudRate::B200),
    (300, BaudRate::B300),
    (600, BaudRate::B600),
    (1200, BaudRate::B1200),
    (1800, BaudRate::B1800),
    (2400, BaudRate::B2400),
    (4800, BaudRate::B4800),
    (9600, BaudRate::B9600),
    (19200, BaudRate::B19200),
    (38400, BaudRate::B38400),
    (57600, BaudRate::B57600),
    (115200, BaudRate::B115200),
    (230400, BaudRate::B230400),
];

#[cfg(any(target_os = "linux", target_os = "android"))]
const HIGH_BAUD_RATES: &[(u32, BaudRate)] = &[
    (460800, BaudRate::B460800),
    (500000, BaudRate::B500000),
    (576000, BaudRate::B576000),
    (921600, BaudRate::B921600),
    (1000000, BaudRate::B1000000),
    (1152000, BaudRate::B1152000),
    (1500000, BaudRate::B1500000),
    (2000000, BaudRate::B2000000),
    (2500000, BaudRate::B2500000),
    (3000000, BaudRate::B3000000),
    (3500000, BaudRate::B3500000),
    (4000000, BaudRate::B4000000),
];

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const HIGH_BAUD_RATES: &[(u32, BaudRate)] = &[];

fn resolve_baud(baud: u32) -> Result<BaudRate> {
    BAUD_RATES
        .iter()
        .chain(HIGH_BAUD_RATES)
        .find(|(rate, _)| *rate == baud)
        .map(|(_, speed)| *speed)
        .ok_or(Error::UnsupportedBaudRate(baud))
}

/// VMIN/VTIME for a read timeout. VTIME counts deciseconds in one byte.
fn timeout_chars(timeout: Option<Duration>) -> (u8, u8) {
    let timeout = match timeout {
        None => return (1, 0),
        Some(t) => t,
    };
    let deci = (timeout.as_nanos() + 99_999_999) / 100_000_000;
    if deci > u8::MAX as u128 {
        warn!("read timeout {:?} capped at 25.5s", timeout);
        (0, u8::MAX)
    } else {
        (0, deci as u8)
    }
}

fn char_size(size: ByteSize) -> Result<ControlFlags> {
    match size {
        ByteSize::FIVE => Ok(ControlFlags::CS5),
        ByteSize::SIX => Ok(ControlFlags::CS6),
        ByteSize::SEVEN => Ok(ControlFlags::CS7),
        ByteSize::EIGHT => Ok(ControlFlags::CS8),
        ByteSize(n) => Err(Error::ByteSize(n)),
    }
}

fn parity_flags(parity: Parity) -> Result<ControlFlags> {
    match parity {
        Parity::NONE => Ok(ControlFlags::empty()),
        Parity::EVEN => Ok(ControlFlags::PARENB),
        Parity::ODD => Ok(ControlFlags::PARENB | ControlFlags::PARODD),
        Parity(c) => Err(Error::Parity(c)),
    }
}

fn io_error(e: Errno) -> Error {
    Error::Io(io::Error::from(e))
}

/// Descriptor that is closed again unless configuration gets all the way through.
struct OpenFd(RawFd);

impl OpenFd {
    fn into_raw(self) -> RawFd {
        let fd = self.0;
        std::mem::forget(self);
        fd
    }
}

impl Drop for OpenFd {
    fn drop(&mut self) {
        let _ = unistd::close(self.0);
    }
}

#[derive(Debug)]
pub struct TtyPort {
    fd: AtomicI32,
    name: String,
    /// VMIN=1: a zero-byte read means the other end hung up.
    blocking: bool,
}

impl TtyPort {
    fn fd(&self) -> Result<RawFd> {
        match self.fd.load(Ordering::Acquire) {
            CLOSED => Err(Error::Closed),
            fd => Ok(fd),
        }
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        let fd = *self.fd.get_mut();
        if fd != CLOSED {
            let _ = unistd::close(fd);
        }
    }
}

impl crate::SerialPort for TtyPort {
    fn supported_baud_rates() -> Vec<u32> {
        BAUD_RATES
            .iter()
            .chain(HIGH_BAUD_RATES)
            .map(|(rate, _)| *rate)
            .collect()
    }

    fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let name = config.name.as_str();
        let speed = resolve_baud(config.baud)?;
        let size = char_size(config.byte_size)?;
        let parity = parity_flags(config.parity)?;

        // O_NONBLOCK so the open does not wait for carrier before CLOCAL is set
        let fd = fcntl::open(
            name,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map(OpenFd)
        .map_err(|e| Error::open(name, e))?;

        fcntl::flock(fd.0, FlockArg::LockExclusiveNonblock).map_err(|e| Error::open(name, e))?;

        let apply = |e: Errno| Error::apply(name, e);
        let mut tty = termios::tcgetattr(fd.0).map_err(apply)?;
        tty.input_flags.remove(InputFlags::all());
        tty.output_flags.remove(OutputFlags::all());
        tty.control_flags.remove(ControlFlags::all());
        tty.local_flags.remove(LocalFlags::all());

        termios::cfsetspeed(&mut tty, speed).map_err(apply)?;
        tty.control_flags.insert(size | parity);
        tty.control_flags.insert(ControlFlags::CREAD);
        tty.control_flags.insert(ControlFlags::CLOCAL);
        if config.stop_bits == StopBits::TWO {
            tty.control_flags.insert(ControlFlags::CSTOPB);
        }
        if config.crlf_translate {
            tty.input_flags.insert(InputFlags::ICRNL);
            tty.output_flags.insert(OutputFlags::OPOST | OutputFlags::ONLCR);
        }

        let (vmin, vtime) = timeout_chars(config.read_timeout);
        tty.control_chars[VMIN as usize] = vmin;
        tty.control_chars[VTIME as usize] = vtime;

        termios::tcsetattr(fd.0, SetArg::TCSAFLUSH, &tty).map_err(apply)?;

        let flags = fcntl::fcntl(fd.0, FcntlArg::F_GETFL).map_err(apply)?;
        let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
        fcntl::fcntl(fd.0, FcntlArg::F_SETFL(flags)).map_err(apply)?;

        debug!("opened {} (vmin={}, vtime={})", config, vmin, vtime);
        Ok(TtyPort {
            fd: AtomicI32::new(fd.into_raw()),
            name: config.name.clone(),
            blocking: config.read_timeout.is_none(),
        })
    }

    fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let fd = self.fd()?;
        if buffer.is_empty() {
            return Ok(0);
        }
        loop {
            match unistd::read(fd, buffer) {
                Err(Errno::EINTR) => continue,
                Ok(0) if self.blocking => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} hung up", self.name),
                    )))
                }
                r => return r.map_err(io_error),
            }
        }
    }

    fn write(&self, buffer: &[u8]) -> Result<usize> {
        let fd = self.fd()?;
        let mut sent = 0;
        while sent < buffer.len() {
            match unistd::write(fd, &buffer[sent..]) {
                Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    sent += n;
                    if sent < buffer.len() {
                        trace!("{}: partial write, {}/{} bytes", self.name, sent, buffer.len());
                    }
                }
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(io_error(e)),
            }
        }
        Ok(sent)
    }

    fn close(&self) -> Result<()> {
        match self.fd.swap(CLOSED, Ordering::AcqRel) {
            CLOSED => Err(Error::Closed),
            fd => {
                debug!("closing {}", self.name);
                unistd::close(fd).map_err(io_error)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
