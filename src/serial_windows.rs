use crate::{Config, Error, Parity, Result, StopBits};
use log::{debug, trace, warn};
use std::{
    io,
    sync::atomic::{AtomicIsize, Ordering},
    time::Duration,
};
use windows::{
    core::{PCSTR, PCWSTR},
    Win32::{
        Devices::Communication::*,
        Foundation::{
            CloseHandle, ERROR_IO_PENDING, GENERIC_READ, GENERIC_WRITE, HANDLE,
            INVALID_HANDLE_VALUE,
        },
        Storage::FileSystem::*,
        System::{
            Threading::{CreateEventW, WaitForSingleObject, INFINITE},
            IO::{GetOverlappedResult, OVERLAPPED},
        },
    },
};

const CLOSED: isize = INVALID_HANDLE_VALUE.0;
const MAXDWORD: u32 = u32::MAX;
const QUEUE_SIZE: u32 = 4096;

const BAUD_RATES: &[u32] = &[
    CBR_110, CBR_300, CBR_600, CBR_1200, CBR_2400, CBR_4800, CBR_9600, CBR_14400, CBR_19200,
    CBR_38400, CBR_57600, CBR_115200, CBR_128000, 230400, CBR_256000, 460800, 921600,
];

// DCB bitfield
const F_BINARY: u32 = 1 << 0;
const F_PARITY: u32 = 1 << 1;

fn resolve_baud(baud: u32) -> Result<u32> {
    BAUD_RATES
        .iter()
        .copied()
        .find(|rate| *rate == baud)
        .ok_or(Error::UnsupportedBaudRate(baud))
}

/// Reads return as soon as one byte is buffered, or after the constant.
fn comm_timeouts(timeout: Option<Duration>) -> COMMTIMEOUTS {
    match timeout {
        Some(t) if t.is_zero() => COMMTIMEOUTS {
            ReadIntervalTimeout: MAXDWORD,
            ..Default::default()
        },
        t => {
            let ms = t
                .map(|t| {
                    let ms = (t.as_nanos() + 999_999) / 1_000_000;
                    ms.clamp(1, (MAXDWORD - 1) as u128) as u32
                })
                .unwrap_or(MAXDWORD - 1);
            COMMTIMEOUTS {
                ReadIntervalTimeout: MAXDWORD,
                ReadTotalTimeoutMultiplier: MAXDWORD,
                ReadTotalTimeoutConstant: ms,
                ..Default::default()
            }
        }
    }
}

fn dcb_parity(parity: Parity) -> Result<DCB_PARITY> {
    match parity {
        Parity::NONE => Ok(NOPARITY),
        Parity::EVEN => Ok(EVENPARITY),
        Parity::ODD => Ok(ODDPARITY),
        Parity(c) => Err(Error::Parity(c)),
    }
}

fn os_error(e: windows::core::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Handle that is closed again unless configuration gets all the way through.
struct OpenHandle(HANDLE);

impl OpenHandle {
    fn into_raw(self) -> HANDLE {
        let handle = self.0;
        std::mem::forget(self);
        handle
    }
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// One overlapped transfer with its own manual-reset event.
struct Overlapped(OVERLAPPED);

impl Overlapped {
    fn new() -> io::Result<Self> {
        let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }.map_err(os_error)?;
        Ok(Self(OVERLAPPED {
            hEvent: event,
            ..Default::default()
        }))
    }

    fn as_mut_ptr(&mut self) -> *mut OVERLAPPED {
        &mut self.0
    }

    /// Waits for the transfer started with this overlapped to finish.
    fn finish(&mut self, port: HANDLE, started: windows::core::Result<()>) -> io::Result<usize> {
        if let Err(e) = started {
            if e.code() != ERROR_IO_PENDING.to_hresult() {
                return Err(os_error(e));
            }
        }
        unsafe { WaitForSingleObject(self.0.hEvent, INFINITE) };
        let mut transferred = 0u32;
        unsafe { GetOverlappedResult(port, &self.0, &mut transferred, false) }.map_err(os_error)?;
        Ok(transferred as usize)
    }
}

impl Drop for Overlapped {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0.hEvent) };
    }
}

#[derive(Debug)]
pub struct ComPort {
    handle: AtomicIsize,
    name: String,
    /// No read timeout: a zero-byte read means the device went away.
    blocking: bool,
}

impl ComPort {
    fn handle(&self) -> Result<HANDLE> {
        match self.handle.load(Ordering::Acquire) {
            CLOSED => Err(Error::Closed),
            h => Ok(HANDLE(h)),
        }
    }
}

impl Drop for ComPort {
    fn drop(&mut self) {
        let h = *self.handle.get_mut();
        if h != CLOSED {
            let _ = unsafe { CloseHandle(HANDLE(h)) };
        }
    }
}

impl crate::SerialPort for ComPort {
    fn supported_baud_rates() -> Vec<u32> {
        BAUD_RATES.to_vec()
    }

    fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let name = config.name.as_str();
        let baud = resolve_baud(config.baud)?;
        let parity = dcb_parity(config.parity)?;

        let mut path = name.as_bytes().to_vec();
        path.push(0);
        let handle = unsafe {
            CreateFileA(
                PCSTR(path.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_MODE(0),
                None,
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                HANDLE::default(),
            )
        }
        .map(OpenHandle)
        .map_err(|e| Error::open(name, os_error(e)))?;

        let apply = |e: windows::core::Error| Error::apply(name, os_error(e));

        let mut dcb = DCB {
            DCBlength: std::mem::size_of::<DCB>() as u32,
            ..Default::default()
        };
        unsafe { GetCommState(handle.0, &mut dcb) }.map_err(apply)?;
        dcb.BaudRate = baud;
        dcb.ByteSize = config.byte_size.0;
        dcb._bitfield = F_BINARY;
        dcb.Parity = parity;
        if dcb.Parity != NOPARITY {
            dcb._bitfield |= F_PARITY;
        }
        dcb.StopBits = if config.stop_bits == StopBits::TWO {
            TWOSTOPBITS
        } else {
            ONESTOPBIT
        };
        unsafe { SetCommState(handle.0, &dcb) }.map_err(apply)?;
        unsafe { SetupComm(handle.0, QUEUE_SIZE, QUEUE_SIZE) }.map_err(apply)?;

        let timeouts = comm_timeouts(config.read_timeout);
        unsafe { SetCommTimeouts(handle.0, &timeouts) }.map_err(apply)?;

        if config.crlf_translate {
            warn!("{}: crlf translation is not available on windows", name);
        }
        debug!(
            "opened {} (read timeout {}ms)",
            config, timeouts.ReadTotalTimeoutConstant
        );
        Ok(ComPort {
            handle: AtomicIsize::new(handle.into_raw().0),
            name: config.name.clone(),
            blocking: config.read_timeout.is_none(),
        })
    }

    fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let handle = self.handle()?;
        if buffer.is_empty() {
            return Ok(0);
        }
        let mut overlapped = Overlapped::new()?;
        let started = unsafe { ReadFile(handle, Some(buffer), None, Some(overlapped.as_mut_ptr())) };
        match overlapped.finish(handle, started)? {
            0 if self.blocking => Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} hung up", self.name),
            ))),
            n => Ok(n),
        }
    }

    fn write(&self, buffer: &[u8]) -> Result<usize> {
        let handle = self.handle()?;
        let mut sent = 0;
        while sent < buffer.len() {
            let mut overlapped = Overlapped::new()?;
            let started = unsafe {
                WriteFile(handle, Some(&buffer[sent..]), None, Some(overlapped.as_mut_ptr()))
            };
            match overlapped.finish(handle, started)? {
                0 => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
                n => sent += n,
            }
            if sent < buffer.len() {
                trace!("{}: partial write, {}/{} bytes", self.name, sent, buffer.len());
            }
        }
        Ok(sent)
    }

    fn close(&self) -> Result<()> {
        match self.handle.swap(CLOSED, Ordering::AcqRel) {
            CLOSED => Err(Error::Closed),
            h => {
                debug!("closing {}", self.name);
                unsafe { CloseHandle(HANDLE(h)) }.map_err(|e| Error::Io(os_error(e)))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
