//! msgbridge-core: Shared types for the msgbridge engine and bridge
//!
//! This crate carries no threads and no engine state. It provides:
//! - `Errno`: numeric failure codes and their descriptions
//! - `Msg`: the two-segment message buffer moved through sockets
//! - `Flags`: send/receive flags
//! - Identifier newtypes for sockets, pipes, listeners and dialers
//! - `kprint`: leveled stderr logging macros
//! - `env`: environment variable helpers used by configuration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod env;
pub mod errno;
pub mod flags;
pub mod id;
pub mod kprint;
pub mod msg;

pub use errno::Errno;
pub use flags::Flags;
pub use id::{DialerId, ListenerId, PipeId, SocketId};
pub use msg::Msg;
