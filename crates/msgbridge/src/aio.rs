//! Completion handles
//!
//! An [`Aio`] pairs one engine completion slot with a caller callback. The
//! two halves have different owners:
//!
//! - the engine slot ([`RawAio`]) is owned exclusively by the handle and
//!   released exactly once, by [`Aio::free`] or drop
//! - the callback target is shared (`Arc`) between the caller and a global
//!   handle table, so the engine's worker can reach it from nothing but
//!   the token it was given
//!
//! The table entry is removed only after `stop` has retired every cycle,
//! so a completion can never reach a handle that has been released. A
//! stale token is logged and ignored.
//!
//! # States
//!
//! ```text
//!   Idle ──arm──► Armed ──complete──► Completed ──arm──► Armed ...
//!                   │                     ▲
//!                 cancel                  │
//!                   ▼                     │
//!               Canceling ───complete─────┘
//!
//!   any ──free──► Freeing ──► Freed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use msgbridge_core::{kdebug, kerror, ktrace, Errno, Msg};
use msgbridge_engine::{AioRef, Engine, RawAio};

use crate::dispatch::{Domain, Reentry, Trampoline};
use crate::endpoint::{Direction, Endpoint};
use crate::error::{Error, Result};
use crate::table::{HandleTable, Token};

/// Lifecycle state of an [`Aio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    /// Never armed
    Idle = 0,
    /// An operation is in flight
    Armed = 1,
    /// Cancel requested, completion pending
    Canceling = 2,
    /// Last cycle finished; result and payload readable
    Completed = 3,
    /// `free` in progress
    Freeing = 4,
    /// Released; every later use is rejected
    Freed = 5,
}

impl HandleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Armed,
            2 => Self::Canceling,
            3 => Self::Completed,
            4 => Self::Freeing,
            _ => Self::Freed,
        }
    }

    fn is_in_flight(self) -> bool {
        matches!(self, Self::Armed | Self::Canceling)
    }

    fn is_released(self) -> bool {
        matches!(self, Self::Freeing | Self::Freed)
    }
}

fn handles() -> &'static HandleTable<AioShared> {
    static HANDLES: OnceLock<HandleTable<AioShared>> = OnceLock::new();
    HANDLES.get_or_init(HandleTable::new)
}

/// Handles currently registered in the process
pub fn live_handles() -> usize {
    handles().len()
}

pub(crate) struct AioShared {
    token: Token,
    state: AtomicU8,
    native: Mutex<Option<RawAio>>,
    released: Mutex<bool>,
    released_cv: Condvar,
    trampoline: Trampoline<Aio>,
    engine: Engine,
}

impl AioShared {
    fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: HandleState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Move from one of `from` to `to`. Returns the state it left.
    fn transition(
        &self,
        from: &[HandleState],
        to: HandleState,
    ) -> std::result::Result<HandleState, HandleState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                from.contains(&HandleState::from_u8(cur)).then_some(to as u8)
            })
            .map(HandleState::from_u8)
            .map_err(HandleState::from_u8)
    }

    fn lock_native(&self) -> MutexGuard<'_, Option<RawAio>> {
        self.native.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn native(&self) -> Option<AioRef> {
        self.lock_native().as_ref().map(RawAio::handle)
    }

    fn mark_released(&self) {
        let mut done = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.released_cv.notify_all();
    }

    /// Block until the `free` in progress elsewhere has finished.
    fn wait_released(&self) {
        let mut done = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .released_cv
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Fixed entry point registered with the engine for every handle.
fn completion_entry(raw: u64) {
    let token = Token::from_raw(raw);
    let Some(shared) = handles().get(token) else {
        kerror!("completion for stale handle token {:#x} ignored", raw);
        return;
    };
    let _ = shared.transition(
        &[HandleState::Armed, HandleState::Canceling],
        HandleState::Completed,
    );
    let view = Aio {
        shared,
        owner: false,
    };
    if let Err(err) = view.shared.trampoline.fire(&view) {
        kerror!(
            "callback for handle {:#x} not delivered: {}",
            raw,
            err
        );
    }
}

/// Completion handle
///
/// Created with a callback and a context value; the callback runs once per
/// completed cycle, on an engine worker, inside the execution domain that
/// was current at creation. The callback receives a borrowed view of the
/// handle, through which it can read the result, take the payload, re-arm
/// or free.
///
/// Dropping the owning handle frees it.
pub struct Aio {
    shared: Arc<AioShared>,
    owner: bool,
}

impl Aio {
    /// Create a handle on the global engine, capturing the current
    /// [`Domain`].
    pub fn new<C, F>(callback: F, context: C) -> Result<Aio>
    where
        C: Send + Sync + 'static,
        F: Fn(&Aio, &C) + Send + Sync + 'static,
    {
        let engine = Engine::global()?;
        Self::with_reentry(engine, Domain::current(), callback, context)
    }

    /// Create a handle on `engine`, capturing the current [`Domain`].
    pub fn new_in<C, F>(engine: &Engine, callback: F, context: C) -> Result<Aio>
    where
        C: Send + Sync + 'static,
        F: Fn(&Aio, &C) + Send + Sync + 'static,
    {
        Self::with_reentry(engine, Domain::current(), callback, context)
    }

    /// Create a handle on `engine` whose callback runs through `reentry`.
    ///
    /// Fails with [`Error::ResourceExhausted`] when the engine has no slot
    /// left. Nothing is left registered on failure.
    pub fn with_reentry<C, F, R>(engine: &Engine, reentry: R, callback: F, context: C) -> Result<Aio>
    where
        C: Send + Sync + 'static,
        F: Fn(&Aio, &C) + Send + Sync + 'static,
        R: Reentry,
    {
        let token = handles().reserve();
        let native = match engine.alloc_aio(completion_entry, token.into_raw()) {
            Ok(native) => native,
            Err(err) => {
                handles().remove(token);
                kdebug!("completion slot allocation failed: {}", err);
                return Err(match err {
                    Errno::NoMem => Error::ResourceExhausted,
                    other => Error::Engine(other),
                });
            }
        };
        let shared = Arc::new(AioShared {
            token,
            state: AtomicU8::new(HandleState::Idle as u8),
            native: Mutex::new(Some(native)),
            released: Mutex::new(false),
            released_cv: Condvar::new(),
            trampoline: Trampoline::new(
                Box::new(reentry),
                Box::new(move |aio: &Aio| callback(aio, &context)),
            ),
            engine: engine.clone(),
        });
        handles().fill(token, Arc::clone(&shared));
        ktrace!("handle {:#x} created", token.into_raw());
        Ok(Aio {
            shared,
            owner: true,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    /// Engine the slot was allocated from
    pub fn engine(&self) -> &Engine {
        &self.shared.engine
    }

    /// Whether this is the owning handle rather than a callback's view
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Arm the handle on `endpoint`. For a send, `payload` (if given)
    /// replaces the attached message first.
    pub fn arm<E>(&self, endpoint: &E, direction: Direction, payload: Option<Msg>) -> Result<()>
    where
        E: Endpoint + ?Sized,
    {
        if let Some(msg) = payload {
            self.set_msg(msg)?;
        }
        match direction {
            Direction::Send => endpoint.submit_send(self),
            Direction::Receive => endpoint.submit_receive(self),
        }
    }

    /// Move to `Armed` and hand the engine slot to `submit`.
    ///
    /// For [`Endpoint`] implementations: `submit` must start exactly one
    /// engine operation on the slot or fail without starting any.
    pub fn submit_with<F>(&self, submit: F) -> Result<()>
    where
        F: FnOnce(&AioRef) -> std::result::Result<(), Errno>,
    {
        let prev = self
            .shared
            .transition(
                &[HandleState::Idle, HandleState::Completed],
                HandleState::Armed,
            )
            .map_err(|cur| match cur {
                HandleState::Armed | HandleState::Canceling => Error::InvalidState("already armed"),
                _ => Error::InvalidState("handle freed"),
            })?;

        let outcome = match self.shared.native() {
            Some(native) => submit(&native).map_err(|err| match err {
                Errno::Busy => Error::InvalidState("already armed"),
                Errno::Canceled => Error::InvalidState("handle stopping"),
                other => Error::Engine(other),
            }),
            None => Err(Error::InvalidState("handle freed")),
        };
        if outcome.is_err() {
            let _ = self.shared.transition(
                &[HandleState::Armed, HandleState::Canceling],
                prev,
            );
        }
        outcome
    }

    /// Request early completion of the in-flight cycle. Never blocks. No
    /// effect unless armed.
    pub fn cancel(&self) {
        if self
            .shared
            .transition(&[HandleState::Armed], HandleState::Canceling)
            .is_err()
        {
            return;
        }
        if let Some(native) = self.shared.native() {
            native.cancel();
        }
    }

    /// Cancel and block until no operation or callback is outstanding.
    /// Returns at once from this handle's own callback.
    pub fn stop(&self) {
        if let Some(native) = self.shared.native() {
            native.stop();
        }
    }

    /// Block until no operation or callback is outstanding.
    /// Returns at once from this handle's own callback.
    pub fn wait(&self) {
        if let Some(native) = self.shared.native() {
            native.wait();
        }
    }

    /// Deadline for cycles armed after this call. `None` never expires.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let native = self
            .shared
            .native()
            .ok_or(Error::InvalidState("handle freed"))?;
        native.set_timeout(timeout);
        Ok(())
    }

    /// Result of the last finished cycle. While armed this is still the
    /// previous cycle's result. `Err(Errno::State)` once freed.
    pub fn result(&self) -> std::result::Result<(), Errno> {
        match self.shared.native() {
            Some(native) => native.result(),
            None => Err(Errno::State),
        }
    }

    /// Attach `msg` for the next send, replacing any attached message.
    pub fn set_msg(&self, msg: Msg) -> Result<()> {
        let state = self.state();
        if state.is_in_flight() {
            return Err(Error::InvalidState("message changed while armed"));
        }
        let native = self
            .shared
            .native()
            .filter(|_| !state.is_released())
            .ok_or(Error::InvalidState("handle freed"))?;
        native.set_msg(Some(msg));
        Ok(())
    }

    /// Detach the message: the one received by the last cycle, or one a
    /// failed send left behind.
    pub fn take_msg(&self) -> Result<Option<Msg>> {
        let state = self.state();
        if state.is_in_flight() {
            return Err(Error::InvalidState("message read while armed"));
        }
        let native = self
            .shared
            .native()
            .filter(|_| !state.is_released())
            .ok_or(Error::InvalidState("handle freed"))?;
        Ok(native.take_msg())
    }

    /// Stop, then release both halves. Idempotent.
    ///
    /// When this returns no callback for the handle is running or will
    /// run, except that called from the handle's own callback, the current
    /// invocation finishes normally. A call racing another `free` blocks
    /// until that one is done.
    pub fn free(&self) {
        let won = self.shared.transition(
            &[
                HandleState::Idle,
                HandleState::Armed,
                HandleState::Canceling,
                HandleState::Completed,
            ],
            HandleState::Freeing,
        );
        match won {
            Ok(_) => {}
            Err(HandleState::Freeing) => {
                let own = self
                    .shared
                    .native()
                    .is_some_and(|native| native.in_own_callback());
                if !own {
                    self.shared.wait_released();
                }
                return;
            }
            Err(_) => return,
        }
        if let Some(native) = self.shared.native() {
            native.stop();
        }
        handles().remove(self.shared.token);
        let native = self.shared.lock_native().take();
        drop(native);
        self.shared.set_state(HandleState::Freed);
        self.shared.mark_released();
        ktrace!("handle {:#x} freed", self.shared.token.into_raw());
    }

    /// Whether `free` has run
    pub fn is_freed(&self) -> bool {
        self.state() == HandleState::Freed
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        if self.owner {
            self.free();
        }
    }
}

impl fmt::Debug for Aio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aio")
            .field("token", &format_args!("{:#x}", self.shared.token.into_raw()))
            .field("state", &self.state())
            .field("owner", &self.owner)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Inline;
    use crate::socket::Socket;
    use msgbridge_core::Flags;
    use msgbridge_engine::{EngineConfig, Protocol};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn engine() -> Engine {
        Engine::new(EngineConfig::new().num_workers(2)).unwrap()
    }

    struct Tally {
        hits: AtomicUsize,
        results: Mutex<Vec<std::result::Result<(), Errno>>>,
    }

    impl Tally {
        fn new() -> Arc<Self> {
            Arc::new(Tally {
                hits: AtomicUsize::new(0),
                results: Mutex::new(Vec::new()),
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn results(&self) -> Vec<std::result::Result<(), Errno>> {
            self.results.lock().unwrap().clone()
        }
    }

    fn record(aio: &Aio, tally: &Arc<Tally>) {
        tally.results.lock().unwrap().push(aio.result());
        tally.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn tallied(engine: &Engine) -> (Aio, Arc<Tally>) {
        let tally = Tally::new();
        let aio = Aio::with_reentry(engine, Inline, record, Arc::clone(&tally)).unwrap();
        (aio, tally)
    }

    #[test]
    fn test_receive_timeout_fires_once() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (aio, tally) = tallied(&e);
        aio.set_timeout(Some(Duration::from_millis(50))).unwrap();
        let start = Instant::now();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        assert_eq!(aio.state(), HandleState::Armed);
        aio.wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(tally.hits(), 1);
        assert_eq!(tally.results(), vec![Err(Errno::TimedOut)]);
        assert_eq!(aio.state(), HandleState::Completed);
        assert_eq!(aio.take_msg(), Ok(None));
    }

    #[test]
    fn test_send_payload_reaches_peer() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let push = Socket::open_in(&e, Protocol::Push0).unwrap();
        let _l = pull.listen("inproc://aio-send", Flags::NONE).unwrap();
        let _d = push.dial("inproc://aio-send", Flags::NONE).unwrap();

        let (aio, tally) = tallied(&e);
        let payload = Msg::from_body(b"0123456789".to_vec());
        aio.arm(&push, Direction::Send, Some(payload)).unwrap();
        aio.wait();
        assert_eq!(tally.results(), vec![Ok(())]);
        assert_eq!(pull.recv(Flags::NONE).unwrap(), b"0123456789");
    }

    #[test]
    fn test_cancel_delivers_canceled_once() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (aio, tally) = tallied(&e);
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.cancel();
        aio.wait();
        assert_eq!(tally.results(), vec![Err(Errno::Canceled)]);
    }

    #[test]
    fn test_cancel_when_not_armed_is_noop() {
        let e = engine();
        let (aio, tally) = tallied(&e);
        aio.cancel();
        aio.wait();
        assert_eq!(aio.state(), HandleState::Idle);
        assert_eq!(tally.hits(), 0);
        assert_eq!(aio.result(), Ok(()));
    }

    #[test]
    fn test_free_while_armed_delivers_then_rejects() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (aio, tally) = tallied(&e);
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.free();
        assert_eq!(tally.results(), vec![Err(Errno::Canceled)]);
        assert!(aio.is_freed());
        assert_eq!(
            aio.arm(&pull, Direction::Receive, None),
            Err(Error::InvalidState("handle freed"))
        );
        assert_eq!(aio.result(), Err(Errno::State));
        assert!(aio.take_msg().is_err());
        assert!(aio.set_timeout(None).is_err());
        aio.free();
        aio.wait();
        aio.stop();
    }

    #[test]
    fn test_arm_while_armed_is_rejected() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (aio, tally) = tallied(&e);
        aio.arm(&pull, Direction::Receive, None).unwrap();
        assert_eq!(
            aio.arm(&pull, Direction::Receive, None),
            Err(Error::InvalidState("already armed"))
        );
        assert_eq!(
            aio.take_msg(),
            Err(Error::InvalidState("message read while armed"))
        );
        assert!(aio.set_msg(Msg::new()).is_err());
        aio.stop();
        assert_eq!(tally.hits(), 1);
        assert_eq!(aio.state(), HandleState::Completed);
    }

    #[test]
    fn test_rearm_keeps_stale_result_until_completion() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let push = Socket::open_in(&e, Protocol::Push0).unwrap();
        let _l = pull.listen("inproc://stale", Flags::NONE).unwrap();
        let _d = push.dial("inproc://stale", Flags::NONE).unwrap();

        let (aio, tally) = tallied(&e);
        aio.set_timeout(Some(Duration::from_millis(10))).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.wait();
        assert_eq!(aio.result(), Err(Errno::TimedOut));

        aio.set_timeout(None).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        assert_eq!(aio.result(), Err(Errno::TimedOut));
        push.send(b"fresh", Flags::NONE).unwrap();
        aio.wait();
        assert_eq!(aio.result(), Ok(()));
        assert_eq!(aio.take_msg().unwrap().unwrap().body(), b"fresh");
        assert_eq!(tally.hits(), 2);
    }

    #[test]
    fn test_rearm_from_callback() {
        let e = engine();
        let pull = Arc::new(Socket::open_in(&e, Protocol::Pull0).unwrap());
        let push = Socket::open_in(&e, Protocol::Push0).unwrap();
        let _l = pull.listen("inproc://loop", Flags::NONE).unwrap();
        let _d = push.dial("inproc://loop", Flags::NONE).unwrap();

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let ctx = (Arc::clone(&pull), Mutex::new(tx));
        let on_recv = |aio: &Aio, (sock, tx): &(Arc<Socket>, Mutex<mpsc::Sender<Vec<u8>>>)| {
            if aio.result().is_err() {
                return;
            }
            if let Ok(Some(msg)) = aio.take_msg() {
                let _ = tx.lock().unwrap().send(msg.into_body());
            }
            let _ = aio.arm(sock.as_ref(), Direction::Receive, None);
        };
        let aio = Aio::with_reentry(&e, Inline, on_recv, ctx).unwrap();
        aio.arm(pull.as_ref(), Direction::Receive, None).unwrap();

        for i in 0..5u8 {
            push.send(&[i], Flags::NONE).unwrap();
        }
        let got: Vec<Vec<u8>> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
        aio.free();
        assert!(aio.is_freed());
    }

    #[test]
    fn test_callback_runs_in_creating_domain() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let domain = Domain::new("app");
        let seen = Arc::new(Mutex::new(None::<String>));
        let aio = domain
            .enter(|| {
                let note = |_: &Aio, seen: &Arc<Mutex<Option<String>>>| {
                    *seen.lock().unwrap() = Some(Domain::current().name().to_string());
                };
                Aio::new_in(&e, note, Arc::clone(&seen))
            })
            .unwrap()
            .unwrap();
        aio.set_timeout(Some(Duration::ZERO)).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.wait();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("app"));
        assert_eq!(aio.result(), Err(Errno::TimedOut));
    }

    #[test]
    fn test_unloaded_domain_skips_callback() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let domain = Domain::new("plugin");
        let tally = Tally::new();
        let aio = Aio::with_reentry(&e, domain.clone(), record, Arc::clone(&tally)).unwrap();
        domain.unload();
        aio.set_timeout(Some(Duration::from_millis(5))).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.wait();
        assert_eq!(tally.hits(), 0);
        assert_eq!(aio.state(), HandleState::Completed);
        assert_eq!(aio.result(), Err(Errno::TimedOut));
    }

    #[test]
    fn test_free_from_own_callback() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (tx, rx) = mpsc::channel::<bool>();
        let on_done = |aio: &Aio, tx: &Mutex<mpsc::Sender<bool>>| {
            aio.free();
            let _ = tx.lock().unwrap().send(aio.is_freed());
        };
        let aio = Aio::with_reentry(&e, Inline, on_done, Mutex::new(tx)).unwrap();
        aio.set_timeout(Some(Duration::ZERO)).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        aio.wait();
        assert!(aio.is_freed());
        assert_eq!(aio.result(), Err(Errno::State));
    }

    #[test]
    fn test_resource_exhausted() {
        let e = Engine::new(EngineConfig::new().num_workers(1).max_aios(1)).unwrap();
        let first = Aio::with_reentry(&e, Inline, |_: &Aio, _: &()| {}, ()).unwrap();
        assert!(live_handles() >= 1);
        let err = Aio::with_reentry(&e, Inline, |_: &Aio, _: &()| {}, ()).unwrap_err();
        assert_eq!(err, Error::ResourceExhausted);
        drop(first);
        assert!(Aio::with_reentry(&e, Inline, |_: &Aio, _: &()| {}, ()).is_ok());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let e = engine();
        let (aio, tally) = tallied(&e);
        let raw = aio.shared.token.into_raw();
        let stale = raw ^ (1 << 32);
        completion_entry(stale);
        completion_entry(Token::from_raw(u64::MAX).into_raw());
        assert_eq!(tally.hits(), 0);
        assert_eq!(aio.state(), HandleState::Idle);
        assert!(!aio.is_freed());
        assert!(handles().get(aio.shared.token).is_some());
    }

    #[test]
    fn test_concurrent_free_waits_for_first() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let tally = Tally::new();
        let slow = |aio: &Aio, tally: &Arc<Tally>| {
            thread::sleep(Duration::from_millis(300));
            record(aio, tally);
        };
        let aio = Aio::with_reentry(&e, Inline, slow, Arc::clone(&tally)).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        thread::scope(|s| {
            let first = s.spawn(|| aio.free());
            thread::sleep(Duration::from_millis(50));
            aio.free();
            assert_eq!(tally.hits(), 1);
            assert!(aio.is_freed());
            first.join().unwrap();
        });
        assert_eq!(tally.results(), vec![Err(Errno::Canceled)]);
    }

    #[test]
    fn test_free_from_callback_during_owner_free() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let tally = Tally::new();
        let refree = |aio: &Aio, tally: &Arc<Tally>| {
            aio.free();
            record(aio, tally);
        };
        let aio = Aio::with_reentry(&e, Inline, refree, Arc::clone(&tally)).unwrap();
        aio.arm(&pull, Direction::Receive, None).unwrap();
        aio.free();
        assert_eq!(tally.results(), vec![Err(Errno::Canceled)]);
        assert!(aio.is_freed());
    }

    #[test]
    fn test_drop_frees_armed_handle() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let (aio, tally) = tallied(&e);
        aio.arm(&pull, Direction::Receive, None).unwrap();
        let live = e.live_aios();
        drop(aio);
        assert_eq!(tally.results(), vec![Err(Errno::Canceled)]);
        assert_eq!(e.live_aios(), live - 1);
    }

    #[test]
    fn test_free_races_with_completions() {
        let e = engine();
        let pull = Socket::open_in(&e, Protocol::Pull0).unwrap();
        let push = Socket::open_in(&e, Protocol::Push0).unwrap();
        let _l = pull.listen("inproc://race", Flags::NONE).unwrap();
        let _d = push.dial("inproc://race", Flags::NONE).unwrap();
        pull.set_size("recv-buffer", 64).unwrap();

        for _ in 0..20 {
            let (aio, tally) = tallied(&e);
            aio.arm(&pull, Direction::Receive, None).unwrap();
            let sender = {
                let push_id = push.id();
                let e2 = e.clone();
                thread::spawn(move || {
                    let _ = e2.send(push_id, b"x", Flags::NONBLOCK);
                })
            };
            aio.free();
            let hits = tally.hits();
            assert_eq!(hits, 1);
            sender.join().unwrap();
            assert_eq!(tally.hits(), hits);
        }
    }
}
