//! # msgbridge-engine
//!
//! In-process messaging engine underneath the msgbridge bridge.
//!
//! This crate provides:
//! - Sockets speaking one of the scalability protocols (pair, push/pull,
//!   pub/sub, req/rep, bus, surveyor/respondent)
//! - Listeners and dialers joining sockets over `inproc://` and `ipc://`
//!   addresses
//! - Completion slots: one asynchronous send or receive at a time, with
//!   timeouts, cancel, stop and wait, reported through a plain function
//!   entry point on a worker thread
//! - Blocking send and receive built on the same slots
//! - Socket options
//!
//! ## Threads
//!
//! Each [`Engine`] runs `num_workers` completion workers plus one timer
//! thread. Callbacks for one slot never overlap.
//!
//! ## Quick Start
//!
//! ```ignore
//! use msgbridge_engine::{Engine, EngineConfig, Protocol};
//! use msgbridge_core::Flags;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let pull = engine.open(Protocol::Pull0)?;
//! let push = engine.open(Protocol::Push0)?;
//! engine.listen(pull, "inproc://jobs", Flags::NONE)?;
//! engine.dial(push, "inproc://jobs", Flags::NONE)?;
//! engine.send(push, b"job-1", Flags::NONE)?;
//! assert_eq!(engine.recv(pull, Flags::NONE)?, b"job-1");
//! ```

#![warn(rust_2018_idioms)]

pub mod aio;
pub mod config;
pub mod engine;
pub mod error;
pub(crate) mod fabric;
pub mod options;
pub(crate) mod parking;
pub(crate) mod pool;
pub mod protocol;
pub mod timer;
pub mod url;

// Re-exports
pub use aio::{AioRef, EntryPoint, RawAio};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::SendError;
pub use options::{OptValue, SockOption, MAX_RECV_BUFFER};
pub use pool::PoolStats;
pub use protocol::Protocol;
pub use timer::HeapTimerStats;
pub use url::Address;

pub use msgbridge_core::{DialerId, Errno, Flags, ListenerId, Msg, PipeId, SocketId};
