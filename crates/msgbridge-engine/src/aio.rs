//! Native completion slots
//!
//! A completion slot tracks one asynchronous operation at a time. The
//! submitter calls `begin`, parks the operation somewhere with a cancel
//! function, and eventually someone calls `finish`. `finish` records the
//! result and hands the slot to the worker pool, which calls the slot's
//! entry point with its opaque token.
//!
//! # Accounting
//!
//! `busy` counts the in-flight operation plus every callback that is
//! queued or running. `wait` blocks until `busy` reaches zero. A finished
//! operation's count moves to its callback, so there is no instant at which
//! an operation has ended but its callback is not yet accounted for.
//!
//! # Serialization
//!
//! Callbacks for one slot never overlap. If a cycle finishes while the
//! previous callback is still running (the callback re-armed and the new
//! operation completed immediately), the running worker loops and invokes
//! the entry point again instead of queueing a second delivery.
//!
//! # Stop
//!
//! While a `stop` is in progress (and forever after `free`) `begin` fails
//! with `Canceled`, so a callback that re-arms during stop cannot keep the
//! slot busy.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use msgbridge_core::{kdebug, kerror, Errno, Msg};

use crate::pool::CompletionPool;
use crate::timer::{TimerHandle, TimerService};

/// Entry point invoked on a worker thread when a cycle completes.
///
/// The argument is the opaque token given at allocation.
pub type EntryPoint = fn(u64);

/// Cancellation hook installed by whoever holds the pending operation.
pub(crate) type CancelFn = Box<dyn FnOnce(Errno) + Send>;

thread_local! {
    /// Slot whose callback is running on this thread
    static RUNNING: Cell<*const AioCore> = const { Cell::new(std::ptr::null()) };
}

struct Op {
    generation: u64,
    cancel: Option<CancelFn>,
    aborted: Option<Errno>,
    timer: Option<TimerHandle>,
    nonblock: bool,
}

struct AioState {
    op: Option<Op>,
    busy: usize,
    cb_queued: bool,
    cb_running: bool,
    cb_again: bool,
    result: Result<(), Errno>,
    msg: Option<Msg>,
    timeout: Option<Duration>,
    stopping: usize,
    freed: bool,
    generation: u64,
}

pub(crate) struct AioCore {
    entry: Option<EntryPoint>,
    token: u64,
    pool: Arc<CompletionPool>,
    timers: Arc<TimerService>,
    state: Mutex<AioState>,
    idle: Condvar,
}

impl AioCore {
    pub(crate) fn new(
        entry: Option<EntryPoint>,
        token: u64,
        pool: Arc<CompletionPool>,
        timers: Arc<TimerService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entry,
            token,
            pool,
            timers,
            state: Mutex::new(AioState {
                op: None,
                busy: 0,
                cb_queued: false,
                cb_running: false,
                cb_again: false,
                result: Ok(()),
                msg: None,
                timeout: None,
                stopping: 0,
                freed: false,
                generation: 0,
            }),
            idle: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn in_own_callback(&self) -> bool {
        RUNNING.with(|r| std::ptr::eq(r.get(), self))
    }

    /// Start a cycle and return its generation. Fails with `Busy` if one
    /// is in flight and with `Canceled` while stopping or after free.
    pub(crate) fn begin(self: &Arc<Self>) -> Result<u64, Errno> {
        let mut st = self.lock();
        if st.freed || st.stopping > 0 {
            return Err(Errno::Canceled);
        }
        if st.op.is_some() {
            return Err(Errno::Busy);
        }
        st.generation += 1;
        let generation = st.generation;
        let (timer, nonblock) = match st.timeout {
            Some(t) if t.is_zero() => (None, true),
            Some(t) => {
                let handle =
                    self.timers
                        .schedule(Instant::now() + t, Arc::downgrade(self), generation);
                (Some(handle), false)
            }
            None => (None, false),
        };
        st.op = Some(Op {
            generation,
            cancel: None,
            aborted: None,
            timer,
            nonblock,
        });
        st.busy += 1;
        Ok(generation)
    }

    /// Whether `generation` is the cycle in flight.
    pub(crate) fn in_cycle(&self, generation: u64) -> bool {
        self.lock()
            .op
            .as_ref()
            .is_some_and(|op| op.generation == generation)
    }

    /// Park the in-flight operation behind `cancel`.
    ///
    /// Fails (without installing `cancel`) if the operation was aborted
    /// before it could be parked, or if it has a zero timeout and so must
    /// not wait. The caller then finishes the cycle with the error.
    pub(crate) fn schedule(&self, cancel: CancelFn) -> Result<(), Errno> {
        let mut st = self.lock();
        let Some(op) = st.op.as_mut() else {
            return Err(Errno::State);
        };
        if let Some(err) = op.aborted {
            return Err(err);
        }
        if op.nonblock {
            return Err(Errno::TimedOut);
        }
        op.cancel = Some(cancel);
        Ok(())
    }

    /// Abort the in-flight operation with `err`.
    ///
    /// `generation` restricts the abort to one cycle (timer expiry).
    fn abort(&self, err: Errno, generation: Option<u64>) {
        let mut st = self.lock();
        let Some(op) = st.op.as_mut() else {
            return;
        };
        if generation.is_some_and(|g| g != op.generation) {
            return;
        }
        match op.cancel.take() {
            Some(cancel) => {
                drop(st);
                cancel(err);
            }
            None => {
                op.aborted.get_or_insert(err);
            }
        }
    }

    pub(crate) fn expire(&self, generation: u64) {
        self.abort(Errno::TimedOut, Some(generation));
    }

    /// Complete the in-flight cycle. Returns `false` if there was none.
    pub(crate) fn finish(self: &Arc<Self>, result: Result<(), Errno>) -> bool {
        self.complete(result, None).is_ok()
    }

    /// Complete a receive, attaching `msg`. Gives the message back if no
    /// cycle was in flight.
    pub(crate) fn finish_recv(self: &Arc<Self>, msg: Msg) -> Result<(), Msg> {
        self.complete(Ok(()), Some(msg)).map_err(|m| m.unwrap_or_default())
    }

    fn complete(
        self: &Arc<Self>,
        result: Result<(), Errno>,
        msg: Option<Msg>,
    ) -> Result<(), Option<Msg>> {
        let mut st = self.lock();
        let Some(op) = st.op.take() else {
            return Err(msg);
        };
        st.result = result;
        if msg.is_some() {
            st.msg = msg;
        }
        let dispatch = if self.entry.is_none() {
            st.busy -= 1;
            if st.busy == 0 {
                self.idle.notify_all();
            }
            false
        } else if st.cb_queued || st.cb_running {
            st.cb_again = true;
            false
        } else {
            st.cb_queued = true;
            true
        };
        drop(st);

        if let Some(timer) = op.timer {
            self.timers.cancel(timer);
        }
        if dispatch {
            self.pool.dispatch(Arc::clone(self));
        }
        Ok(())
    }

    /// Run the entry point for every pending completion. Called by the
    /// worker pool.
    pub(crate) fn run_callbacks(self: &Arc<Self>) {
        let Some(entry) = self.entry else {
            return;
        };
        {
            let mut st = self.lock();
            st.cb_queued = false;
            st.cb_running = true;
        }
        loop {
            let prev = RUNNING.with(|r| r.replace(Arc::as_ptr(self)));
            let outcome = catch_unwind(AssertUnwindSafe(|| entry(self.token)));
            RUNNING.with(|r| r.set(prev));
            if let Err(panic) = outcome {
                kerror!(
                    "completion callback for token {:#x} panicked: {}",
                    self.token,
                    panic_message(panic.as_ref())
                );
            }

            let mut st = self.lock();
            st.busy -= 1;
            if st.cb_again {
                st.cb_again = false;
                continue;
            }
            st.cb_running = false;
            if st.busy == 0 {
                self.idle.notify_all();
            }
            break;
        }
    }

    pub(crate) fn wait(&self) {
        if self.in_own_callback() {
            kdebug!(
                "wait on token {:#x} from its own callback; not blocking",
                self.token
            );
            return;
        }
        let mut st = self.lock();
        while st.busy > 0 {
            st = self.idle.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn stop(&self) {
        self.lock().stopping += 1;
        self.abort(Errno::Canceled, None);
        self.wait();
        self.lock().stopping -= 1;
    }

    /// Permanently refuse new cycles and retire the current one.
    fn release(&self) {
        self.lock().freed = true;
        self.abort(Errno::Canceled, None);
        self.wait();
    }

    fn is_active(&self) -> bool {
        self.lock().op.is_some()
    }

    fn result(&self) -> Result<(), Errno> {
        self.lock().result
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.lock().timeout = timeout;
    }

    fn set_msg(&self, msg: Option<Msg>) {
        self.lock().msg = msg;
    }

    fn take_msg(&self) -> Option<Msg> {
        self.lock().msg.take()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

// ============================================================================
// Public handles
// ============================================================================

/// Non-owning reference to a completion slot
///
/// Cloning is cheap. Dropping an `AioRef` never frees the slot; only the
/// owning [`RawAio`] does that.
#[derive(Clone)]
pub struct AioRef {
    pub(crate) core: Arc<AioCore>,
}

impl AioRef {
    /// Token given at allocation
    pub fn token(&self) -> u64 {
        self.core.token
    }

    /// Request cancellation of the in-flight cycle. Never blocks; the
    /// cycle completes with `Canceled` through the normal path. No effect
    /// when nothing is in flight.
    pub fn cancel(&self) {
        self.core.abort(Errno::Canceled, None);
    }

    /// Cancel and wait until no operation or callback is outstanding.
    /// Cycles begun from the callback while stopping fail with `Canceled`.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Wait until no operation or callback is outstanding.
    ///
    /// Returns at once when called from this slot's own callback.
    pub fn wait(&self) {
        self.core.wait();
    }

    /// Timeout applied to cycles begun after this call. `None` waits
    /// forever; zero fails any operation that cannot complete at once.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.core.set_timeout(timeout);
    }

    /// Result of the most recently finished cycle.
    pub fn result(&self) -> Result<(), Errno> {
        self.core.result()
    }

    /// Attach (or clear) the message.
    pub fn set_msg(&self, msg: Option<Msg>) {
        self.core.set_msg(msg);
    }

    /// Detach the message.
    pub fn take_msg(&self) -> Option<Msg> {
        self.core.take_msg()
    }

    /// Whether a cycle is in flight.
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Whether both refer to the same slot.
    pub fn ptr_eq(&self, other: &AioRef) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Whether the calling thread is running this slot's callback
    pub fn in_own_callback(&self) -> bool {
        self.core.in_own_callback()
    }

    pub(crate) fn downgrade(&self) -> Weak<AioCore> {
        Arc::downgrade(&self.core)
    }
}

/// Live slot counter shared by an engine's allocations
pub(crate) struct AioLimit {
    live: AtomicUsize,
    max: usize,
}

impl AioLimit {
    pub(crate) fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicUsize::new(0),
            max,
        })
    }

    pub(crate) fn acquire(&self) -> Result<(), Errno> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| Errno::NoMem)
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Owning handle to a completion slot
///
/// Dropping it (or calling [`free`](Self::free)) stops the slot and
/// releases it. Dereferences to [`AioRef`] for every other operation.
pub struct RawAio {
    handle: AioRef,
    limit: Option<Arc<AioLimit>>,
}

impl RawAio {
    pub(crate) fn new(core: Arc<AioCore>, limit: Option<Arc<AioLimit>>) -> Self {
        Self {
            handle: AioRef { core },
            limit,
        }
    }

    /// Non-owning reference
    pub fn handle(&self) -> AioRef {
        self.handle.clone()
    }

    /// Stop and release. Equivalent to dropping.
    pub fn free(self) {}
}

impl std::ops::Deref for RawAio {
    type Target = AioRef;

    fn deref(&self) -> &AioRef {
        &self.handle
    }
}

impl Drop for RawAio {
    fn drop(&mut self) {
        self.handle.core.release();
        if let Some(limit) = self.limit.take() {
            limit.release();
        }
        kdebug!("completion slot {:#x} released", self.handle.core.token);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::CompletionPool;
    use crate::timer::TimerService;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Rig {
        pool: Arc<CompletionPool>,
        timers: Arc<TimerService>,
        threads: Vec<thread::JoinHandle<()>>,
    }

    impl Rig {
        fn new() -> Self {
            let pool = CompletionPool::new(Duration::from_millis(20));
            let timers = TimerService::new(Duration::from_millis(20));
            let mut threads = Vec::new();
            pool.spawn_workers(2, "aio-test", &mut threads).unwrap();
            threads.push(timers.spawn("aio-test-timer".into()).unwrap());
            Rig {
                pool,
                timers,
                threads,
            }
        }

        fn alloc(&self, entry: Option<EntryPoint>, token: u64) -> RawAio {
            let core = AioCore::new(entry, token, self.pool.clone(), self.timers.clone());
            RawAio::new(core, None)
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            self.pool.shutdown();
            self.timers.shutdown();
            for t in self.threads.drain(..) {
                t.join().unwrap();
            }
        }
    }

    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    static HITS: [AtomicUsize; 8] = [ZERO; 8];

    fn count_hit(token: u64) {
        HITS[token as usize].fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_finish_dispatches_once() {
        let rig = Rig::new();
        let aio = rig.alloc(Some(count_hit), 0);
        aio.core.begin().unwrap();
        assert!(aio.is_active());
        assert!(aio.core.finish(Err(Errno::Closed)));
        assert!(!aio.core.finish(Ok(())));
        aio.wait();
        assert_eq!(HITS[0].load(Ordering::SeqCst), 1);
        assert_eq!(aio.result(), Err(Errno::Closed));
    }

    #[test]
    fn test_begin_while_active_is_busy() {
        let rig = Rig::new();
        let aio = rig.alloc(None, 1);
        aio.core.begin().unwrap();
        assert_eq!(aio.core.begin(), Err(Errno::Busy));
        aio.core.finish(Ok(()));
        aio.wait();
        assert!(aio.core.begin().is_ok());
        aio.core.finish(Ok(()));
    }

    #[test]
    fn test_timeout_aborts_through_cancel_fn() {
        let rig = Rig::new();
        let aio = rig.alloc(Some(count_hit), 2);
        aio.set_timeout(Some(Duration::from_millis(30)));
        let start = Instant::now();
        aio.core.begin().unwrap();
        let weak = aio.downgrade();
        aio.core
            .schedule(Box::new(move |err| {
                if let Some(core) = weak.upgrade() {
                    core.finish(Err(err));
                }
            }))
            .unwrap();
        aio.wait();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(aio.result(), Err(Errno::TimedOut));
        assert_eq!(HITS[2].load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_before_schedule_is_reported() {
        let rig = Rig::new();
        let aio = rig.alloc(None, 3);
        aio.core.begin().unwrap();
        aio.cancel();
        let err = aio.core.schedule(Box::new(|_| {})).unwrap_err();
        assert_eq!(err, Errno::Canceled);
        aio.core.finish(Err(err));
        aio.wait();
        assert_eq!(aio.result(), Err(Errno::Canceled));
    }

    #[test]
    fn test_zero_timeout_refuses_to_park() {
        let rig = Rig::new();
        let aio = rig.alloc(None, 4);
        aio.set_timeout(Some(Duration::ZERO));
        aio.core.begin().unwrap();
        assert_eq!(aio.core.schedule(Box::new(|_| {})), Err(Errno::TimedOut));
        aio.core.finish(Err(Errno::TimedOut));
    }

    #[test]
    fn test_stop_rejects_begin_and_then_allows_it() {
        let rig = Rig::new();
        let aio = rig.alloc(None, 5);
        aio.core.begin().unwrap();
        let weak = aio.downgrade();
        aio.core
            .schedule(Box::new(move |err| {
                if let Some(core) = weak.upgrade() {
                    core.finish(Err(err));
                }
            }))
            .unwrap();
        aio.stop();
        assert_eq!(aio.result(), Err(Errno::Canceled));
        assert!(aio.core.begin().is_ok());
        aio.core.finish(Ok(()));
    }

    #[test]
    fn test_cancel_idle_is_noop() {
        let rig = Rig::new();
        let aio = rig.alloc(Some(count_hit), 6);
        aio.cancel();
        aio.wait();
        assert_eq!(HITS[6].load(Ordering::SeqCst), 0);
        assert_eq!(aio.result(), Ok(()));
    }

    #[test]
    fn test_limit() {
        let limit = AioLimit::new(1);
        assert!(limit.acquire().is_ok());
        assert_eq!(limit.acquire(), Err(Errno::NoMem));
        limit.release();
        assert_eq!(limit.live(), 0);
        assert!(limit.acquire().is_ok());
    }
}
