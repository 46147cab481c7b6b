//! Engine object identifiers
//!
//! Sockets, pipes, listeners and dialers are referenced by small integer
//! ids handed out by the engine. Ids are never reused within one engine.

use core::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from its raw value
            #[inline]
            pub const fn new(id: u32) -> Self {
                $name(id)
            }

            /// Get the raw u32 value
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(id: u32) -> Self {
                $name(id)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an open socket
    SocketId,
    "socket"
);
define_id!(
    /// Identifier of a connection between two sockets
    PipeId,
    "pipe"
);
define_id!(
    /// Identifier of a listener
    ListenerId,
    "listener"
);
define_id!(
    /// Identifier of a dialer
    DialerId,
    "dialer"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formatting() {
        let s = SocketId::new(3);
        assert_eq!(format!("{:?}", s), "SocketId(3)");
        assert_eq!(format!("{}", s), "socket#3");
        assert_eq!(format!("{}", PipeId::from(9)), "pipe#9");
    }

    #[test]
    fn test_id_conversion() {
        let d = DialerId::new(42);
        let raw: u32 = d.into();
        assert_eq!(raw, 42);
        assert_eq!(ListenerId::new(1).as_u32(), 1);
    }
}
