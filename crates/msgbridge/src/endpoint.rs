//! Endpoints that can arm a completion handle.

use crate::aio::Aio;
use crate::error::Result;

/// Direction of an armed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Send the handle's attached message
    Send,
    /// Receive into the handle
    Receive,
}

/// A transport object that accepts non-blocking operations on a handle.
///
/// Both calls return as soon as the operation is submitted. They fail only
/// when the handle cannot be armed (already armed, freed, stopping);
/// everything that goes wrong with the operation itself is reported
/// through the handle's callback.
///
/// Implementations normally forward to [`Aio::submit_with`].
pub trait Endpoint {
    /// Arm `aio` to send its attached message.
    fn submit_send(&self, aio: &Aio) -> Result<()>;

    /// Arm `aio` to receive one message.
    fn submit_receive(&self, aio: &Aio) -> Result<()>;
}
