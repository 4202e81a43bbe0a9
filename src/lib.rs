//! Read and write a serial port as a plain byte stream, with the same
//! behaviour on POSIX terminals and Windows COM ports.
//!
//! ```no_run
//! use serial_stream::{open_port, Config, SerialPort};
//!
//! let port = open_port(&Config::new("/dev/ttyUSB0", 115200))?;
//! port.write(b"test")?;
//! let mut buf = [0u8; 128];
//! let n = port.read(&mut buf)?;
//! println!("{:?}", &buf[..n]);
//! # Ok::<(), serial_stream::Error>(())
//! ```
//!
//! One thread may read while another writes on the same [`Port`] (share it
//! through an `Arc`). Two concurrent readers, or two concurrent writers, are
//! not supported and must be serialized by the caller.

mod config;
mod error;

pub use config::{ByteSize, Config, Parity, StopBits};
pub use error::{Error, Result};

#[cfg(unix)]
#[path = ""]
mod m {
    mod serial_unix;
    pub type Port = serial_unix::TtyPort;
}

#[cfg(windows)]
#[path = ""]
mod m {
    mod serial_windows;
    pub type Port = serial_windows::ComPort;
}

#[cfg(not(any(unix, windows)))]
compile_error!("serial-stream supports unix and windows targets only");

pub use m::*;

use std::io;

pub trait SerialPort: Sized {
    /// Rates accepted by [`SerialPort::open`] on this platform, ascending.
    fn supported_baud_rates() -> Vec<u32>;

    /// Validates `config`, then opens `config.name` and applies it. Either
    /// returns a fully configured port or fails with nothing left open.
    fn open(config: &Config) -> Result<Self>;

    /// Blocks until at least one byte is available or the read timeout
    /// elapses; `Ok(0)` means the timeout fired with no data. Without a read
    /// timeout, a device that hung up is an `UnexpectedEof` error.
    fn read(&self, buffer: &mut [u8]) -> Result<usize>;

    /// Blocks until all of `buffer` has been handed to the OS.
    fn write(&self, buffer: &[u8]) -> Result<usize>;

    /// Releases the device. Later calls, including another `close`, fail
    /// with [`Error::Closed`]. Must not race an in-flight read or write.
    fn close(&self) -> Result<()>;

    /// Device name the port was opened with.
    fn name(&self) -> &str;
}

/// Validates `config` and opens the port it names.
pub fn open_port(config: &Config) -> Result<Port> {
    Port::open(config)
}

impl io::Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Read for &Port {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SerialPort::read(*self, buf).map_err(Into::into)
    }
}

impl io::Write for Port {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &Port {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SerialPort::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
