//! Completion worker pool
//!
//! N threads drain a lock-free MPMC queue of completion slots whose
//! callback is due and run it. Idle workers park on the platform parking
//! primitive; every push wakes one.
//!
//! After shutdown, `dispatch` runs callbacks inline on the finishing
//! thread so no completion is stranded in a queue nobody drains.

use crossbeam_queue::SegQueue;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use msgbridge_core::{kdebug, ktrace};

use crate::aio::AioCore;
use crate::parking::{new_parking, WorkerParking};

/// Pool counters
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Worker threads
    pub workers: usize,
    /// Workers currently running a callback
    pub active: usize,
    /// Callbacks handed to the pool
    pub dispatched: u64,
    /// Callbacks run inline after shutdown
    pub inline: u64,
}

pub(crate) struct CompletionPool {
    queue: SegQueue<Arc<AioCore>>,
    parking: Box<dyn WorkerParking>,
    shutdown: AtomicBool,
    park_timeout: Duration,
    workers: AtomicUsize,
    active: AtomicUsize,
    dispatched: AtomicU64,
    inline: AtomicU64,
}

impl CompletionPool {
    pub(crate) fn new(park_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            queue: SegQueue::new(),
            parking: new_parking(),
            shutdown: AtomicBool::new(false),
            park_timeout,
            workers: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            inline: AtomicU64::new(0),
        })
    }

    /// Start `n` workers named `{prefix}-worker-{i}`, pushing their
    /// handles onto `handles`. Workers started before a spawn failure stay
    /// in `handles`.
    pub(crate) fn spawn_workers(
        self: &Arc<Self>,
        n: usize,
        prefix: &str,
        handles: &mut Vec<JoinHandle<()>>,
    ) -> io::Result<()> {
        handles.reserve(n);
        for worker_id in 0..n {
            let pool = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", prefix, worker_id))
                .spawn(move || pool.worker_loop(worker_id))?;
            handles.push(handle);
            self.workers.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Queue `core`'s callback.
    pub(crate) fn dispatch(&self, core: Arc<AioCore>) {
        if self.shutdown.load(Ordering::Acquire) {
            self.inline.fetch_add(1, Ordering::Relaxed);
            core.run_callbacks();
            return;
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.queue.push(core);
        self.parking.wake_one();
    }

    /// Stop the workers. Anything still queued is drained by the caller
    /// through [`drain`](Self::drain) after the workers are joined.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.parking.wake_all();
    }

    pub(crate) fn drain(&self) {
        while let Some(core) = self.queue.pop() {
            self.inline.fetch_add(1, Ordering::Relaxed);
            core.run_callbacks();
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
        }
    }

    fn worker_loop(&self, worker_id: usize) {
        kdebug!("completion worker {} started", worker_id);
        loop {
            let ticket = self.parking.prepare();
            if let Some(core) = self.queue.pop() {
                self.active.fetch_add(1, Ordering::Relaxed);
                core.run_callbacks();
                self.active.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            if !self.parking.park(ticket, Some(self.park_timeout)) {
                ktrace!("completion worker {} idle", worker_id);
            }
        }
        kdebug!("completion worker {} exiting", worker_id);
    }
}
