//! Socket options
//!
//! Options are addressed by name, as in the wire-level API, and carry a
//! typed [`OptValue`]. Setters coerce the obvious neighbors: an `Int` is
//! accepted for booleans, sizes and millisecond durations (`-1` meaning
//! infinite). Anything else of the wrong type fails with `Inval`.

use core::fmt;
use std::time::Duration;

use msgbridge_core::Errno;

use crate::protocol::Protocol;

/// Named socket option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockOption {
    /// `socket-name`: free-form label
    SocketName,
    /// `compat:domain`: 1 cooked, 2 raw (read-only)
    Domain,
    /// `raw`
    Raw,
    /// `linger`
    Linger,
    /// `recv-buffer`: receive queue depth in messages
    RecvBuffer,
    /// `send-buffer`
    SendBuffer,
    /// `recv-fd` (unsupported in-process)
    RecvFd,
    /// `send-fd` (unsupported in-process)
    SendFd,
    /// `recv-timeout`
    RecvTimeout,
    /// `send-timeout`
    SendTimeout,
    /// `local-address` (endpoint option)
    LocalAddress,
    /// `remote-address` (endpoint option)
    RemoteAddress,
    /// `url` (endpoint option)
    Url,
    /// `ttl-max`
    MaxTtl,
    /// `protocol` (read-only)
    Protocol,
    /// `transport` (endpoint option)
    Transport,
    /// `recv-size-max`: larger messages are dropped on arrival, 0 = no limit
    RecvMaxSize,
    /// `reconnect-time-min`
    ReconnectMin,
    /// `reconnect-time-max`
    ReconnectMax,
}

impl SockOption {
    /// Every option
    pub const ALL: [SockOption; 19] = [
        SockOption::SocketName,
        SockOption::Domain,
        SockOption::Raw,
        SockOption::Linger,
        SockOption::RecvBuffer,
        SockOption::SendBuffer,
        SockOption::RecvFd,
        SockOption::SendFd,
        SockOption::RecvTimeout,
        SockOption::SendTimeout,
        SockOption::LocalAddress,
        SockOption::RemoteAddress,
        SockOption::Url,
        SockOption::MaxTtl,
        SockOption::Protocol,
        SockOption::Transport,
        SockOption::RecvMaxSize,
        SockOption::ReconnectMin,
        SockOption::ReconnectMax,
    ];

    /// Wire name
    pub const fn name(self) -> &'static str {
        match self {
            SockOption::SocketName => "socket-name",
            SockOption::Domain => "compat:domain",
            SockOption::Raw => "raw",
            SockOption::Linger => "linger",
            SockOption::RecvBuffer => "recv-buffer",
            SockOption::SendBuffer => "send-buffer",
            SockOption::RecvFd => "recv-fd",
            SockOption::SendFd => "send-fd",
            SockOption::RecvTimeout => "recv-timeout",
            SockOption::SendTimeout => "send-timeout",
            SockOption::LocalAddress => "local-address",
            SockOption::RemoteAddress => "remote-address",
            SockOption::Url => "url",
            SockOption::MaxTtl => "ttl-max",
            SockOption::Protocol => "protocol",
            SockOption::Transport => "transport",
            SockOption::RecvMaxSize => "recv-size-max",
            SockOption::ReconnectMin => "reconnect-time-min",
            SockOption::ReconnectMax => "reconnect-time-max",
        }
    }

    /// Look up by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.name() == name)
    }
}

impl fmt::Display for SockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed option value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i32),
    /// Duration; `None` is infinite
    Ms(Option<Duration>),
    /// Size or count
    Size(usize),
    /// Unsigned 64-bit
    U64(u64),
    /// Text
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl OptValue {
    /// Boolean view; nonzero integers are true
    pub fn as_bool(&self) -> Result<bool, Errno> {
        match *self {
            OptValue::Bool(b) => Ok(b),
            OptValue::Int(i) => Ok(i != 0),
            _ => Err(Errno::Inval),
        }
    }

    /// Integer view
    pub fn as_int(&self) -> Result<i32, Errno> {
        match *self {
            OptValue::Int(i) => Ok(i),
            _ => Err(Errno::Inval),
        }
    }

    /// Duration view; a negative integer means no limit
    pub fn as_ms(&self) -> Result<Option<Duration>, Errno> {
        match *self {
            OptValue::Ms(d) => Ok(d),
            OptValue::Int(i) if i < 0 => Ok(None),
            OptValue::Int(i) => Ok(Some(Duration::from_millis(i as u64))),
            _ => Err(Errno::Inval),
        }
    }

    /// Size view
    pub fn as_size(&self) -> Result<usize, Errno> {
        match *self {
            OptValue::Size(n) => Ok(n),
            OptValue::Int(i) => usize::try_from(i).map_err(|_| Errno::Inval),
            OptValue::U64(u) => usize::try_from(u).map_err(|_| Errno::Inval),
            _ => Err(Errno::Inval),
        }
    }

    /// Unsigned 64-bit view
    pub fn as_u64(&self) -> Result<u64, Errno> {
        match *self {
            OptValue::U64(u) => Ok(u),
            OptValue::Size(n) => Ok(n as u64),
            OptValue::Int(i) => u64::try_from(i).map_err(|_| Errno::Inval),
            _ => Err(Errno::Inval),
        }
    }

    /// Text view; bytes must be UTF-8
    pub fn into_string(self) -> Result<String, Errno> {
        match self {
            OptValue::Str(s) => Ok(s),
            OptValue::Bytes(b) => String::from_utf8(b).map_err(|_| Errno::Inval),
            _ => Err(Errno::Inval),
        }
    }

    /// Byte view
    pub fn into_bytes(self) -> Result<Vec<u8>, Errno> {
        match self {
            OptValue::Bytes(b) => Ok(b),
            OptValue::Str(s) => Ok(s.into_bytes()),
            _ => Err(Errno::Inval),
        }
    }
}

/// Largest accepted `recv-buffer`
pub const MAX_RECV_BUFFER: usize = 8192;

/// Per-socket option storage
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
    pub(crate) name: String,
    pub(crate) raw: bool,
    pub(crate) linger: Option<Duration>,
    pub(crate) recv_buffer: usize,
    pub(crate) send_buffer: usize,
    pub(crate) recv_timeout: Option<Duration>,
    pub(crate) send_timeout: Option<Duration>,
    pub(crate) max_ttl: i32,
    pub(crate) recv_max_size: usize,
    pub(crate) reconnect_min: Option<Duration>,
    pub(crate) reconnect_max: Option<Duration>,
}

impl SocketOptions {
    pub(crate) fn new(name: String, recv_buffer: usize) -> Self {
        Self {
            name,
            raw: false,
            linger: Some(Duration::ZERO),
            recv_buffer: recv_buffer.min(MAX_RECV_BUFFER),
            send_buffer: 0,
            recv_timeout: None,
            send_timeout: None,
            max_ttl: 8,
            recv_max_size: 0,
            reconnect_min: Some(Duration::from_millis(100)),
            reconnect_max: None,
        }
    }

    pub(crate) fn get(&self, opt: SockOption, protocol: Protocol) -> Result<OptValue, Errno> {
        let value = match opt {
            SockOption::SocketName => OptValue::Str(self.name.clone()),
            SockOption::Domain => OptValue::Int(if self.raw { 2 } else { 1 }),
            SockOption::Raw => OptValue::Bool(self.raw),
            SockOption::Linger => OptValue::Ms(self.linger),
            SockOption::RecvBuffer => OptValue::Size(self.recv_buffer),
            SockOption::SendBuffer => OptValue::Size(self.send_buffer),
            SockOption::RecvTimeout => OptValue::Ms(self.recv_timeout),
            SockOption::SendTimeout => OptValue::Ms(self.send_timeout),
            SockOption::MaxTtl => OptValue::Int(self.max_ttl),
            SockOption::Protocol => OptValue::Int(i32::from(protocol.number())),
            SockOption::RecvMaxSize => OptValue::Size(self.recv_max_size),
            SockOption::ReconnectMin => OptValue::Ms(self.reconnect_min),
            SockOption::ReconnectMax => OptValue::Ms(self.reconnect_max),
            SockOption::RecvFd
            | SockOption::SendFd
            | SockOption::LocalAddress
            | SockOption::RemoteAddress
            | SockOption::Url
            | SockOption::Transport => return Err(Errno::NotSup),
        };
        Ok(value)
    }

    pub(crate) fn set(&mut self, opt: SockOption, value: OptValue) -> Result<(), Errno> {
        match opt {
            SockOption::SocketName => self.name = value.into_string()?,
            SockOption::Raw => self.raw = value.as_bool()?,
            SockOption::Linger => self.linger = value.as_ms()?,
            SockOption::RecvBuffer => {
                let n = value.as_size()?;
                if n > MAX_RECV_BUFFER {
                    return Err(Errno::Inval);
                }
                self.recv_buffer = n;
            }
            SockOption::SendBuffer => {
                let n = value.as_size()?;
                if n > MAX_RECV_BUFFER {
                    return Err(Errno::Inval);
                }
                self.send_buffer = n;
            }
            SockOption::RecvTimeout => self.recv_timeout = value.as_ms()?,
            SockOption::SendTimeout => self.send_timeout = value.as_ms()?,
            SockOption::MaxTtl => {
                let ttl = value.as_int()?;
                if !(1..=255).contains(&ttl) {
                    return Err(Errno::Inval);
                }
                self.max_ttl = ttl;
            }
            SockOption::RecvMaxSize => self.recv_max_size = value.as_size()?,
            SockOption::ReconnectMin => self.reconnect_min = value.as_ms()?,
            SockOption::ReconnectMax => self.reconnect_max = value.as_ms()?,
            SockOption::Domain | SockOption::Protocol => return Err(Errno::ReadOnly),
            SockOption::RecvFd
            | SockOption::SendFd
            | SockOption::LocalAddress
            | SockOption::RemoteAddress
            | SockOption::Url
            | SockOption::Transport => return Err(Errno::NotSup),
        }
        Ok(())
    }
}
