//! Bridge error types.

use std::fmt;

use msgbridge_core::Errno;

/// Failures surfaced synchronously by the bridge.
///
/// Failures of an operation itself (timeout, cancel, closed socket) are
/// never reported here; they arrive through [`Aio::result`](crate::Aio::result).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The engine could not allocate another completion slot.
    ResourceExhausted,
    /// The handle is in the wrong state for the call.
    InvalidState(&'static str),
    /// The engine rejected the call.
    Engine(Errno),
}

impl Error {
    /// Engine code behind this error, if any.
    pub fn errno(&self) -> Option<Errno> {
        match *self {
            Self::ResourceExhausted => Some(Errno::NoMem),
            Self::InvalidState(_) => None,
            Self::Engine(e) => Some(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhausted => write!(f, "completion slots exhausted"),
            Self::InvalidState(why) => write!(f, "invalid handle state: {}", why),
            Self::Engine(e) => write!(f, "engine error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Self::Engine(e)
    }
}

/// Result alias for bridge calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::InvalidState("already armed").to_string(),
            "invalid handle state: already armed"
        );
        assert_eq!(
            Error::ResourceExhausted.to_string(),
            "completion slots exhausted"
        );
        assert!(Error::Engine(Errno::Closed).to_string().starts_with("engine error: "));
    }

    #[test]
    fn test_errno() {
        assert_eq!(Error::from(Errno::Closed).errno(), Some(Errno::Closed));
        assert_eq!(Error::ResourceExhausted.errno(), Some(Errno::NoMem));
        assert_eq!(Error::InvalidState("x").errno(), None);
    }
}
