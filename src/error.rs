use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad byte size: {0} (expected 5, 6, 7 or 8)")]
    ByteSize(u8),

    #[error("bad parity: {0:?} (expected 'N', 'E' or 'O')")]
    Parity(char),

    #[error("bad number of stop bits: {0} (expected 1 or 2)")]
    StopBits(u8),

    #[error("unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    #[error("failed to open {name}: {source}")]
    DeviceOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to configure {name}: {source}")]
    ConfigurationApply {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("serial port is closed")]
    Closed,

    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn open(name: &str, source: impl Into<io::Error>) -> Self {
        Self::DeviceOpen {
            name: name.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn apply(name: &str, source: impl Into<io::Error>) -> Self {
        Self::ConfigurationApply {
            name: name.to_string(),
            source: source.into(),
        }
    }

    /// True for the errors [`crate::Config::validate`] produces.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ByteSize(_) | Self::Parity(_) | Self::StopBits(_))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, e),
            Error::DeviceOpen { .. } | Error::ConfigurationApply { .. } => {
                io::Error::new(io::ErrorKind::Other, e)
            }
            _ => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_maps_to_not_connected() {
        let e: io::Error = Error::Closed.into();
        assert_eq!(e.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn io_error_is_unwrapped() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let e: io::Error = Error::Io(inner).into();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn open_error_keeps_device_name_and_cause() {
        let e = Error::open("/dev/ttyS9", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(e.to_string().contains("/dev/ttyS9"));
        match e {
            Error::DeviceOpen { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validation_errors_are_config_errors() {
        assert!(Error::ByteSize(9).is_config());
        assert!(Error::StopBits(3).is_config());
        assert!(Error::Parity('X').is_config());
        assert!(!Error::UnsupportedBaudRate(12345).is_config());
        assert!(!Error::Closed.is_config());
    }
}
