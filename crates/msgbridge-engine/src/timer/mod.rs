//! Operation deadlines
//!
//! Each armed completion slot with a timeout registers one [`TimerEntry`].
//! A dedicated thread ([`TimerService`]) pops expired entries and asks the
//! slot to abort with `TimedOut`. Entries carry the slot's cycle
//! generation, so a deadline that fires after its cycle already finished
//! is ignored by the slot.

mod heap;
mod service;

pub use heap::{HeapTimerBackend, HeapTimerStats};
pub(crate) use service::TimerService;

use crate::aio::AioCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Instant;

/// Handle used to cancel a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

impl TimerHandle {
    /// Fresh, process-unique handle
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TimerHandle(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A registered deadline
pub(crate) struct TimerEntry {
    pub(crate) handle: TimerHandle,
    pub(crate) deadline: Instant,
    pub(crate) target: Weak<AioCore>,
    pub(crate) generation: u64,
}

/// A deadline that has passed
pub(crate) struct ExpiredTimer {
    pub(crate) target: Weak<AioCore>,
    pub(crate) generation: u64,
}

/// Storage for pending deadlines
pub(crate) trait TimerBackend: Send + Sync {
    /// Register an entry
    fn insert(&self, entry: TimerEntry) -> TimerHandle;

    /// Forget a timer. Returns `false` if it was already cancelled.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove and return every entry with `deadline <= now`
    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer>;

    /// Earliest pending deadline, if any
    fn next_deadline(&self) -> Option<Instant>;
}
