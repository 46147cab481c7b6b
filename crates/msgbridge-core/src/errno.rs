//! Engine error codes.
//!
//! Every failure the engine reports, synchronously or through a completion,
//! is an [`Errno`]. The numeric values are stable and match the wire/ABI
//! codes used by the messaging engine, so they can be logged and compared
//! across processes.

use std::fmt;

/// Failure code reported by the messaging engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Errno {
    /// Interrupted.
    Intr,
    /// Out of memory, or an engine-wide resource limit was hit.
    NoMem,
    /// Invalid argument.
    Inval,
    /// Resource busy.
    Busy,
    /// Operation timed out.
    TimedOut,
    /// Connection refused.
    ConnRefused,
    /// Object closed.
    Closed,
    /// Operation would block.
    Again,
    /// Not supported.
    NotSup,
    /// Address already in use.
    AddrInUse,
    /// Incorrect state for the requested operation.
    State,
    /// Entry not found.
    NoEnt,
    /// Protocol error.
    Proto,
    /// Destination unreachable.
    Unreachable,
    /// Address invalid.
    AddrInval,
    /// Permission denied.
    Perm,
    /// Message too large.
    MsgSize,
    /// Connection aborted.
    ConnAborted,
    /// Connection reset.
    ConnReset,
    /// Operation canceled.
    Canceled,
    /// Out of files.
    NoFiles,
    /// Out of space.
    NoSpc,
    /// Resource already exists.
    Exist,
    /// Read only resource.
    ReadOnly,
    /// Write only resource.
    WriteOnly,
    /// Cryptographic error.
    Crypto,
    /// Peer could not be authenticated.
    PeerAuth,
    /// Internal error detected.
    Internal,
    /// Operating system error (raw `errno`).
    Sys(i32),
    /// Transport-specific error.
    Tran(i32),
}

impl Errno {
    /// Bit marking an operating system error code.
    pub const SYSERR: i32 = 0x1000_0000;
    /// Bit marking a transport error code.
    pub const TRANERR: i32 = 0x2000_0000;

    /// Numeric code of this error.
    pub const fn code(self) -> i32 {
        match self {
            Self::Intr => 1,
            Self::NoMem => 2,
            Self::Inval => 3,
            Self::Busy => 4,
            Self::TimedOut => 5,
            Self::ConnRefused => 6,
            Self::Closed => 7,
            Self::Again => 8,
            Self::NotSup => 9,
            Self::AddrInUse => 10,
            Self::State => 11,
            Self::NoEnt => 12,
            Self::Proto => 13,
            Self::Unreachable => 14,
            Self::AddrInval => 15,
            Self::Perm => 16,
            Self::MsgSize => 17,
            Self::ConnAborted => 18,
            Self::ConnReset => 19,
            Self::Canceled => 20,
            Self::NoFiles => 21,
            Self::NoSpc => 22,
            Self::Exist => 23,
            Self::ReadOnly => 24,
            Self::WriteOnly => 25,
            Self::Crypto => 26,
            Self::PeerAuth => 27,
            Self::Internal => 1000,
            Self::Sys(e) => Self::SYSERR | e,
            Self::Tran(e) => Self::TRANERR | e,
        }
    }

    /// Decode a numeric code. `0` means success and yields `None`;
    /// unrecognized codes decode as [`Errno::Internal`].
    pub const fn from_code(code: i32) -> Option<Self> {
        let e = match code {
            0 => return None,
            1 => Self::Intr,
            2 => Self::NoMem,
            3 => Self::Inval,
            4 => Self::Busy,
            5 => Self::TimedOut,
            6 => Self::ConnRefused,
            7 => Self::Closed,
            8 => Self::Again,
            9 => Self::NotSup,
            10 => Self::AddrInUse,
            11 => Self::State,
            12 => Self::NoEnt,
            13 => Self::Proto,
            14 => Self::Unreachable,
            15 => Self::AddrInval,
            16 => Self::Perm,
            17 => Self::MsgSize,
            18 => Self::ConnAborted,
            19 => Self::ConnReset,
            20 => Self::Canceled,
            21 => Self::NoFiles,
            22 => Self::NoSpc,
            23 => Self::Exist,
            24 => Self::ReadOnly,
            25 => Self::WriteOnly,
            26 => Self::Crypto,
            27 => Self::PeerAuth,
            c if c & Self::SYSERR != 0 => Self::Sys(c & !Self::SYSERR),
            c if c & Self::TRANERR != 0 => Self::Tran(c & !Self::TRANERR),
            _ => Self::Internal,
        };
        Some(e)
    }

    /// Convert a numeric code into a `Result`.
    pub fn check(code: i32) -> Result<(), Errno> {
        match Self::from_code(code) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Map an OS `errno` onto the closest engine code, falling back to
    /// [`Errno::Sys`].
    pub fn from_os_error(errno: i32) -> Self {
        match errno {
            libc::EINTR => Self::Intr,
            libc::ENOMEM => Self::NoMem,
            libc::EINVAL => Self::Inval,
            libc::EBUSY => Self::Busy,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::ECONNREFUSED => Self::ConnRefused,
            libc::EBADF => Self::Closed,
            libc::EAGAIN => Self::Again,
            libc::ENOTSUP => Self::NotSup,
            libc::EADDRINUSE => Self::AddrInUse,
            libc::ENOENT => Self::NoEnt,
            libc::EPROTO => Self::Proto,
            libc::EHOSTUNREACH | libc::ENETUNREACH => Self::Unreachable,
            libc::EADDRNOTAVAIL => Self::AddrInval,
            libc::EPERM | libc::EACCES => Self::Perm,
            libc::EMSGSIZE => Self::MsgSize,
            libc::ECONNABORTED => Self::ConnAborted,
            libc::ECONNRESET => Self::ConnReset,
            libc::ECANCELED => Self::Canceled,
            libc::EMFILE | libc::ENFILE => Self::NoFiles,
            libc::ENOSPC => Self::NoSpc,
            libc::EEXIST => Self::Exist,
            libc::EROFS => Self::ReadOnly,
            e => Self::Sys(e),
        }
    }

    /// Human-readable description (strerror).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intr => "Interrupted",
            Self::NoMem => "Out of memory",
            Self::Inval => "Invalid argument",
            Self::Busy => "Resource busy",
            Self::TimedOut => "Timed out",
            Self::ConnRefused => "Connection refused",
            Self::Closed => "Object closed",
            Self::Again => "Try again",
            Self::NotSup => "Not supported",
            Self::AddrInUse => "Address in use",
            Self::State => "Incorrect state",
            Self::NoEnt => "Entry not found",
            Self::Proto => "Protocol error",
            Self::Unreachable => "Destination unreachable",
            Self::AddrInval => "Address invalid",
            Self::Perm => "Permission denied",
            Self::MsgSize => "Message too large",
            Self::ConnAborted => "Connection aborted",
            Self::ConnReset => "Connection reset",
            Self::Canceled => "Operation canceled",
            Self::NoFiles => "Out of files",
            Self::NoSpc => "Out of space",
            Self::Exist => "Resource already exists",
            Self::ReadOnly => "Read only resource",
            Self::WriteOnly => "Write only resource",
            Self::Crypto => "Cryptographic error",
            Self::PeerAuth => "Peer could not be authenticated",
            Self::Internal => "Internal error detected",
            Self::Sys(_) => "System error",
            Self::Tran(_) => "Transport error",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sys(e) => write!(f, "{}", std::io::Error::from_raw_os_error(*e)),
            Self::Tran(e) => write!(f, "Transport error #{}", e),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for Errno {}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        if let Some(e) = err.raw_os_error() {
            return Self::from_os_error(e);
        }
        match err.kind() {
            ErrorKind::TimedOut => Self::TimedOut,
            ErrorKind::WouldBlock => Self::Again,
            ErrorKind::OutOfMemory => Self::NoMem,
            ErrorKind::InvalidInput => Self::Inval,
            ErrorKind::PermissionDenied => Self::Perm,
            ErrorKind::NotFound => Self::NoEnt,
            ErrorKind::Interrupted => Self::Intr,
            ErrorKind::ConnectionRefused => Self::ConnRefused,
            ErrorKind::ConnectionReset => Self::ConnReset,
            ErrorKind::ConnectionAborted => Self::ConnAborted,
            ErrorKind::AddrInUse => Self::AddrInUse,
            ErrorKind::AlreadyExists => Self::Exist,
            ErrorKind::Unsupported => Self::NotSup,
            _ => Self::Internal,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_for_named_codes() {
        for code in 1..=27 {
            let e = Errno::from_code(code).unwrap();
            assert_eq!(e.code(), code);
        }
        assert_eq!(Errno::from_code(1000), Some(Errno::Internal));
    }

    #[test]
    fn test_zero_is_success() {
        assert_eq!(Errno::from_code(0), None);
        assert!(Errno::check(0).is_ok());
        assert_eq!(Errno::check(5), Err(Errno::TimedOut));
    }

    #[test]
    fn test_sys_and_tran_bits() {
        let sys = Errno::Sys(libc::EIO);
        assert_eq!(sys.code(), Errno::SYSERR | libc::EIO);
        assert_eq!(Errno::from_code(sys.code()), Some(sys));

        let tran = Errno::Tran(7);
        assert_eq!(Errno::from_code(0x2000_0007), Some(tran));
        assert_eq!(tran.to_string(), "Transport error #7");
    }

    #[test]
    fn test_unknown_code_is_internal() {
        assert_eq!(Errno::from_code(999), Some(Errno::Internal));
    }

    #[test]
    fn test_os_error_mapping() {
        assert_eq!(Errno::from_os_error(libc::ETIMEDOUT), Errno::TimedOut);
        assert_eq!(Errno::from_os_error(libc::ECANCELED), Errno::Canceled);
        assert_eq!(Errno::from_os_error(libc::EIO), Errno::Sys(libc::EIO));

        let io = std::io::Error::from_raw_os_error(libc::EADDRINUSE);
        assert_eq!(Errno::from(io), Errno::AddrInUse);

        let kind = std::io::Error::new(std::io::ErrorKind::WouldBlock, "x");
        assert_eq!(Errno::from(kind), Errno::Again);
    }

    #[test]
    fn test_strerror() {
        assert_eq!(Errno::Canceled.to_string(), "Operation canceled");
        assert_eq!(Errno::TimedOut.as_str(), "Timed out");
        assert_eq!(Errno::State.to_string(), "Incorrect state");
    }
}
