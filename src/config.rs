use crate::{Error, Result};
use std::{fmt, time::Duration};

/// Number of data bits per character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteSize(pub u8);

impl ByteSize {
    pub const FIVE: Self = Self(5);
    pub const SIX: Self = Self(6);
    pub const SEVEN: Self = Self(7);
    pub const EIGHT: Self = Self(8);
}

impl Default for ByteSize {
    fn default() -> Self {
        Self::EIGHT
    }
}

/// Parity mode, in the usual `8N1` letter notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parity(pub char);

impl Parity {
    pub const NONE: Self = Self('N');
    pub const EVEN: Self = Self('E');
    pub const ODD: Self = Self('O');
}

impl Default for Parity {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StopBits(pub u8);

impl StopBits {
    pub const ONE: Self = Self(1);
    pub const TWO: Self = Self(2);
}

impl Default for StopBits {
    fn default() -> Self {
        Self::ONE
    }
}

/// Everything needed to open a serial port.
///
/// More options may be added later, so build it by field name:
///
/// ```
/// use serial_stream::Config;
///
/// let config = Config {
///     name: "/dev/ttyUSB0".into(),
///     baud: 115200,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Device path (`/dev/ttyUSB0`) or port name (`COM3`), passed to the OS as is.
    pub name: String,
    pub baud: u32,
    pub byte_size: ByteSize,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Map CR to NL on input and NL to CR-NL on output. Ignored on Windows.
    pub crlf_translate: bool,
    /// `None` blocks until at least one byte arrives. `Some(ZERO)` returns
    /// whatever is buffered right away. `Some(d)` waits up to `d` for the
    /// first byte and then returns `Ok(0)` if nothing came.
    pub read_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            baud: 9600,
            byte_size: ByteSize::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            crlf_translate: false,
            read_timeout: None,
        }
    }
}

impl Config {
    pub fn new(name: impl Into<String>, baud: u32) -> Self {
        Self {
            name: name.into(),
            baud,
            ..Default::default()
        }
    }

    /// Checks the enumerated options. Touches no OS resource.
    pub fn validate(&self) -> Result<()> {
        match self.byte_size.0 {
            5..=8 => {}
            n => return Err(Error::ByteSize(n)),
        }
        match self.stop_bits.0 {
            1 | 2 => {}
            n => return Err(Error::StopBits(n)),
        }
        match self.parity {
            Parity::NONE | Parity::EVEN | Parity::ODD => Ok(()),
            Parity(c) => Err(Error::Parity(c)),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}{}",
            self.name, self.baud, self.byte_size.0, self.parity.0, self.stop_bits.0
        )
    }
}
