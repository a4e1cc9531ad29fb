use evssh_core::packet::WrapRawError;
use std::{io, sync::Arc};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Every error is fatal to the connection it occurred on.
///
/// Errors are cloned into each waiter that is rejected because of them.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("corrupted MAC on input")]
    Integrity,
    #[error("incompatible version: {0}")]
    Version(String),
    #[error("disconnected by peer ({reason}): {description}")]
    Disconnect { reason: u32, description: String },
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    #[error("key exchange failed: {0}")]
    KeyExchange(String),
    #[error("host key verification failed for {0}")]
    HostKeyMismatch(String),
    #[error("payload could not be decompressed")]
    Compression,
    #[error("malformed {0} message")]
    Message(&'static str),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("padding error: {need} remaining bytes with block size {block_size}")]
    Padding { need: i64, block_size: usize },
    #[error("packet too large ({0} bytes)")]
    TooLarge(usize),
    #[error("invalid packet ({0:?})")]
    Invalid(WrapRawError),
    #[error("payload too large to frame ({0} bytes)")]
    PayloadTooLarge(usize),
}

impl Error {
    /// Whether this error was caused by the connection going away rather than a protocol
    /// violation.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::Disconnect { .. } | Self::Io(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        let e = Error::from(FramingError::Padding { need: 5, block_size: 8 });
        assert_eq!(e.to_string(), "framing error: padding error: 5 remaining bytes with block size 8");
        assert_eq!(Error::Integrity.to_string(), "corrupted MAC on input");
    }

    #[test]
    fn clone_io() {
        let e = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        let f = e.clone();
        assert!(f.is_closed());
        assert!(!Error::Integrity.is_closed());
    }
}
