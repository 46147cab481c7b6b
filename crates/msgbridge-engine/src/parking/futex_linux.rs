//! Linux futex parking
//!
//! The futex word is a wake epoch. `prepare` reads it, `park` sleeps while
//! it still equals the ticket, and every wake bumps it before calling
//! FUTEX_WAKE. The kernel compares the word atomically with going to
//! sleep, so a bump between `prepare` and `park` makes FUTEX_WAIT return
//! EAGAIN at once.

use super::{ParkTicket, WorkerParking};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Futex-backed parking
pub struct FutexParking {
    epoch: AtomicU32,
    parked: AtomicUsize,
}

impl FutexParking {
    /// New parking word
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        // SAFETY: the futex word lives as long as `self`; FUTEX_WAKE does
        // not dereference the remaining arguments.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn prepare(&self) -> ParkTicket {
        ParkTicket(self.epoch.load(Ordering::Acquire))
    }

    fn park(&self, ticket: ParkTicket, timeout: Option<Duration>) -> bool {
        if self.epoch.load(Ordering::Acquire) != ticket.0 {
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        self.parked.fetch_add(1, Ordering::SeqCst);
        // SAFETY: the futex word and the timespec outlive the call.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                ticket.0,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);

        self.epoch.load(Ordering::Acquire) != ticket.0
    }

    fn wake_one(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(1);
        }
    }

    fn wake_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(i32::MAX);
        }
    }
}
