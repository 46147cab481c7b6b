//! Timer thread
//!
//! Polls the heap, aborts the slots whose deadlines passed, then parks
//! until the next deadline (capped at `max_sleep`). Inserting a timer
//! wakes the thread so a new, earlier deadline is honored.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use msgbridge_core::{kdebug, ktrace};

use super::{HeapTimerBackend, HeapTimerStats, TimerBackend, TimerEntry, TimerHandle};
use crate::aio::AioCore;
use crate::parking::{new_parking, WorkerParking};

pub(crate) struct TimerService {
    backend: HeapTimerBackend,
    parking: Box<dyn WorkerParking>,
    shutdown: AtomicBool,
    max_sleep: Duration,
    loops: AtomicU64,
}

impl TimerService {
    pub(crate) fn new(max_sleep: Duration) -> Arc<Self> {
        Arc::new(Self {
            backend: HeapTimerBackend::new(),
            parking: new_parking(),
            shutdown: AtomicBool::new(false),
            max_sleep,
            loops: AtomicU64::new(0),
        })
    }

    pub(crate) fn spawn(self: &Arc<Self>, name: String) -> io::Result<JoinHandle<()>> {
        let service = Arc::clone(self);
        thread::Builder::new().name(name).spawn(move || service.run())
    }

    /// Register a deadline for `target`'s cycle `generation`.
    pub(crate) fn schedule(
        &self,
        deadline: Instant,
        target: Weak<AioCore>,
        generation: u64,
    ) -> TimerHandle {
        let handle = self.backend.insert(TimerEntry {
            handle: TimerHandle::next(),
            deadline,
            target,
            generation,
        });
        self.parking.wake_one();
        handle
    }

    pub(crate) fn cancel(&self, handle: TimerHandle) {
        self.backend.cancel(handle);
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parking.wake_all();
    }

    pub(crate) fn stats(&self) -> HeapTimerStats {
        self.backend.stats()
    }

    fn run(&self) {
        kdebug!("timer thread started (max_sleep={:?})", self.max_sleep);
        loop {
            let ticket = self.parking.prepare();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.loops.fetch_add(1, Ordering::Relaxed);

            for expired in self.backend.poll_expired(Instant::now()) {
                if let Some(core) = expired.target.upgrade() {
                    ktrace!("deadline reached for cycle {}", expired.generation);
                    core.expire(expired.generation);
                }
            }

            let sleep = match self.backend.next_deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.max_sleep),
                None => self.max_sleep,
            };
            if !sleep.is_zero() {
                self.parking.park(ticket, Some(sleep));
            }
        }
        kdebug!(
            "timer thread exiting after {} loops",
            self.loops.load(Ordering::Relaxed)
        );
    }
}
