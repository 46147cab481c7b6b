//! Engine error types.

use std::fmt;

use msgbridge_core::{Errno, Msg};

/// A failed send. The message is handed back to the caller.
#[derive(Debug)]
pub struct SendError {
    /// Why the send failed
    pub errno: Errno,
    /// The message that was not sent
    pub msg: Msg,
}

impl SendError {
    /// Pair an error with the unsent message
    pub fn new(errno: Errno, msg: Msg) -> Self {
        Self { errno, msg }
    }

    /// Recover the message
    pub fn into_msg(self) -> Msg {
        self.msg
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.errno)
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.errno)
    }
}

impl From<SendError> for Errno {
    fn from(e: SendError) -> Self {
        e.errno
    }
}
