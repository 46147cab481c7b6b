//! Idle thread parking
//!
//! Completion workers and the timer thread sleep here when they have
//! nothing to do. Parking is ticket based: a thread takes a ticket, checks
//! its work source, and only then parks with that ticket. Any wake issued
//! after the ticket was taken makes the park return immediately, so a wake
//! that races with the final check is never lost.

use std::time::Duration;

/// Snapshot of the wake epoch taken before the last work check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkTicket(pub(crate) u32);

/// Sleep/wake primitive for engine threads
pub trait WorkerParking: Send + Sync {
    /// Take a ticket. Call before checking for work.
    fn prepare(&self) -> ParkTicket;

    /// Sleep until a wake newer than `ticket` or `timeout`.
    ///
    /// Returns `true` if a wake was observed.
    fn park(&self, ticket: ParkTicket, timeout: Option<Duration>) -> bool;

    /// Wake one parked thread
    fn wake_one(&self);

    /// Wake every parked thread
    fn wake_all(&self);
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_times_out() {
        let parking = new_parking();
        let ticket = parking.prepare();
        let start = Instant::now();
        let woken = parking.park(ticket, Some(Duration::from_millis(30)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let parking = new_parking();
        let ticket = parking.prepare();
        parking.wake_one();
        let start = Instant::now();
        assert!(parking.park(ticket, Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_one_releases_parked_thread() {
        let parking = Arc::new(PlatformParking::new());
        let p2 = Arc::clone(&parking);

        let handle = thread::spawn(move || {
            let ticket = p2.prepare();
            p2.park(ticket, Some(Duration::from_secs(5)))
        });

        thread::sleep(Duration::from_millis(20));
        parking.wake_all();
        assert!(handle.join().unwrap());
    }
}
