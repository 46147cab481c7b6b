//! # msgbridge
//!
//! Completion handles for the msgbridge engine.
//!
//! The engine finishes asynchronous sends and receives on its own worker
//! threads. An [`Aio`] turns each finished operation into exactly one call
//! of a user callback, run inside the [`Domain`] that created the handle,
//! and makes sure no callback can run once the handle has been freed.
//!
//! ## Modules
//!
//! - `aio` - the completion handle and its state machine
//! - `dispatch` - execution domains and the reentry trampoline
//! - `endpoint` - the contract for arming a handle
//! - `socket` - sockets, listeners and dialers
//! - `error` - bridge error type
//!
//! ## Quick Start
//!
//! ```ignore
//! use msgbridge::{Aio, Direction, Flags, Protocol, Socket};
//! use std::time::Duration;
//!
//! let sock = Socket::open(Protocol::Pull0)?;
//! let _listener = sock.listen("inproc://jobs", Flags::NONE)?;
//!
//! let aio = Aio::new(
//!     |aio: &Aio, name: &String| match aio.result() {
//!         Ok(()) => println!("{} got {:?}", name, aio.take_msg()),
//!         Err(e) => println!("{} failed: {}", name, e),
//!     },
//!     "worker-1".to_string(),
//! )?;
//! aio.set_timeout(Some(Duration::from_millis(50)))?;
//! aio.arm(&sock, Direction::Receive, None)?;
//! aio.wait();
//! ```

#![warn(rust_2018_idioms)]

pub mod aio;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod socket;
mod table;

// Re-exports
pub use aio::{live_handles, Aio, HandleState};
pub use dispatch::{Domain, Inline, Reentry};
pub use endpoint::{Direction, Endpoint};
pub use error::{Error, Result};
pub use socket::{Dialer, Listener, Socket};

pub use msgbridge_core::{Errno, Flags, Msg};
pub use msgbridge_engine::{AioRef, Engine, EngineConfig, OptValue, Protocol, SendError};
