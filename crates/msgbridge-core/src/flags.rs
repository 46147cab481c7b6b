//! Send/receive flags.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

/// Flags accepted by blocking send/receive and by dialer/listener start.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Flags(u32);

impl Flags {
    /// No flags: block until the operation completes.
    pub const NONE: Flags = Flags(0);
    /// Buffer is engine-allocated. Accepted for compatibility; no effect.
    pub const ALLOC: Flags = Flags(1);
    /// Fail with `Errno::Again` instead of blocking.
    pub const NONBLOCK: Flags = Flags(2);

    /// Raw bit value.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    #[inline]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Flags(bits & (Self::ALLOC.0 | Self::NONBLOCK.0))
    }

    /// Whether every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Shorthand for `contains(Flags::NONBLOCK)`.
    #[inline]
    pub const fn is_nonblocking(self) -> bool {
        self.contains(Self::NONBLOCK)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("Flags(NONE)");
        }
        let mut names = Vec::new();
        if self.contains(Self::ALLOC) {
            names.push("ALLOC");
        }
        if self.contains(Self::NONBLOCK) {
            names.push("NONBLOCK");
        }
        write!(f, "Flags({})", names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let f = Flags::ALLOC | Flags::NONBLOCK;
        assert!(f.contains(Flags::NONBLOCK));
        assert!(f.is_nonblocking());
        assert!(!Flags::NONE.is_nonblocking());
        assert_eq!(format!("{:?}", f), "Flags(ALLOC | NONBLOCK)");
    }

    #[test]
    fn test_unknown_bits_dropped() {
        assert_eq!(Flags::from_bits_truncate(0xff), Flags::ALLOC | Flags::NONBLOCK);
    }
}
