//! The engine handle
//!
//! An [`Engine`] owns the completion workers, the timer thread, the socket
//! fabric and the socket registry. It is cheap to clone; the threads stop
//! when the last clone is dropped, after every socket has been closed.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use msgbridge_core::{kdebug, kerror, kinfo};
use msgbridge_core::{DialerId, Errno, Flags, ListenerId, Msg, SocketId};

use crate::aio::{AioCore, AioLimit, AioRef, CancelFn, EntryPoint, RawAio};
use crate::config::EngineConfig;
use crate::error::SendError;
use crate::fabric::{Fabric, Queue};
use crate::options::{OptValue, SockOption};
use crate::pool::{CompletionPool, PoolStats};
use crate::protocol::Protocol;
use crate::timer::{HeapTimerStats, TimerService};

static GLOBAL: OnceLock<Engine> = OnceLock::new();

pub(crate) struct EngineInner {
    config: EngineConfig,
    fabric: Mutex<Fabric>,
    pool: Arc<CompletionPool>,
    timers: Arc<TimerService>,
    limit: Arc<AioLimit>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineInner {
    fn fabric(&self) -> MutexGuard<'_, Fabric> {
        self.fabric.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        {
            let mut fabric = self.fabric();
            for id in fabric.socket_ids() {
                let _ = fabric.close(id);
            }
        }
        self.pool.shutdown();
        self.timers.shutdown();

        let me = thread::current().id();
        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                kerror!("engine thread panicked during shutdown");
            }
        }
        self.pool.drain();
        kdebug!("engine stopped");
    }
}

/// Handle to a messaging engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Start an engine: `config.num_workers` completion workers plus one
    /// timer thread.
    pub fn new(config: EngineConfig) -> Result<Self, Errno> {
        config.validate().map_err(|msg| {
            kerror!("invalid engine config: {}", msg);
            Errno::Inval
        })?;

        let pool = CompletionPool::new(config.park_timeout);
        let timers = TimerService::new(config.timer_max_sleep);
        let engine = Engine {
            inner: Arc::new(EngineInner {
                fabric: Mutex::new(Fabric::new(config.recv_buffer)),
                pool: Arc::clone(&pool),
                timers: Arc::clone(&timers),
                limit: AioLimit::new(config.max_aios),
                threads: Mutex::new(Vec::new()),
                config,
            }),
        };

        // On failure `engine` drops here and stops whatever did start.
        {
            let prefix = &engine.inner.config.thread_prefix;
            let mut threads = engine
                .inner
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            pool.spawn_workers(engine.inner.config.num_workers, prefix, &mut threads)?;
            threads.push(timers.spawn(format!("{}-timer", prefix))?);
        }

        kinfo!(
            "engine started: {} workers, max {} aios",
            engine.inner.config.num_workers,
            engine.inner.config.max_aios
        );
        Ok(engine)
    }

    /// Process-wide engine, configured from the environment on first use.
    pub fn global() -> Result<&'static Engine, Errno> {
        if let Some(engine) = GLOBAL.get() {
            return Ok(engine);
        }
        let engine = Engine::new(EngineConfig::from_env())?;
        Ok(GLOBAL.get_or_init(move || engine))
    }

    /// Configuration this engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same engine
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn fabric(&self) -> MutexGuard<'_, Fabric> {
        self.inner.fabric()
    }

    // ------------------------------------------------------------------
    // Completion slots
    // ------------------------------------------------------------------

    /// Allocate a completion slot that calls `entry(token)` on a worker
    /// thread after each finished cycle.
    ///
    /// Fails with `NoMem` once `max_aios` slots are live.
    pub fn alloc_aio(&self, entry: EntryPoint, token: u64) -> Result<RawAio, Errno> {
        self.inner.limit.acquire()?;
        let core = AioCore::new(
            Some(entry),
            token,
            Arc::clone(&self.inner.pool),
            Arc::clone(&self.inner.timers),
        );
        Ok(RawAio::new(core, Some(Arc::clone(&self.inner.limit))))
    }

    /// Slot without a callback, for blocking operations.
    fn blocking_aio(&self) -> RawAio {
        let core = AioCore::new(
            None,
            0,
            Arc::clone(&self.inner.pool),
            Arc::clone(&self.inner.timers),
        );
        RawAio::new(core, None)
    }

    /// Completion slots currently allocated through [`alloc_aio`](Self::alloc_aio)
    pub fn live_aios(&self) -> usize {
        self.inner.limit.live()
    }

    fn cancel_hook(
        &self,
        sock: SocketId,
        queue: Queue,
        aio: &AioRef,
        generation: u64,
    ) -> CancelFn {
        let engine = Arc::downgrade(&self.inner);
        let target = aio.downgrade();
        Box::new(move |err| {
            if let Some(inner) = engine.upgrade() {
                inner
                    .fabric()
                    .cancel_waiter(sock, queue, &target, generation, err);
            }
        })
    }

    /// Start sending the message attached to `aio`.
    ///
    /// Returns an error only if the cycle could not begin: `Busy` while a
    /// cycle is in flight, `Canceled` while the slot is stopping. Every
    /// other failure arrives through the completion.
    pub fn submit_send(&self, sock: SocketId, aio: &AioRef) -> Result<(), Errno> {
        let generation = aio.core.begin()?;
        let cancel = self.cancel_hook(sock, Queue::Send, aio, generation);
        self.fabric().submit_send(sock, aio, cancel);
        Ok(())
    }

    /// Start receiving into `aio`. Errors as for [`submit_send`](Self::submit_send).
    pub fn submit_recv(&self, sock: SocketId, aio: &AioRef) -> Result<(), Errno> {
        let generation = aio.core.begin()?;
        let cancel = self.cancel_hook(sock, Queue::Recv, aio, generation);
        self.fabric().submit_recv(sock, aio, cancel);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sockets
    // ------------------------------------------------------------------

    /// Open a socket
    pub fn open(&self, protocol: Protocol) -> Result<SocketId, Errno> {
        Ok(self.fabric().open(protocol))
    }

    /// Close a socket. Pending operations complete with `Closed`.
    pub fn close(&self, sock: SocketId) -> Result<(), Errno> {
        self.fabric().close(sock)
    }

    /// Close every open socket
    pub fn close_all(&self) {
        let mut fabric = self.fabric();
        let ids = fabric.socket_ids();
        let n = ids.len();
        for id in ids {
            let _ = fabric.close(id);
        }
        kdebug!("closed {} sockets", n);
    }

    /// Snapshot of open sockets, in creation order
    pub fn socket_ids(&self) -> Vec<SocketId> {
        self.fabric().socket_ids()
    }

    /// Protocol of an open socket
    pub fn protocol(&self, sock: SocketId) -> Result<Protocol, Errno> {
        Ok(self.fabric().socket(sock)?.protocol)
    }

    /// Read an option by wire name
    pub fn get_opt(&self, sock: SocketId, name: &str) -> Result<OptValue, Errno> {
        let opt = SockOption::from_name(name).ok_or(Errno::NotSup)?;
        self.fabric().get_opt(sock, opt)
    }

    /// Write an option by wire name
    pub fn set_opt(&self, sock: SocketId, name: &str, value: OptValue) -> Result<(), Errno> {
        let opt = SockOption::from_name(name).ok_or(Errno::NotSup)?;
        self.fabric().set_opt(sock, opt, value)
    }

    fn timeout_for(&self, sock: SocketId, queue: Queue, flags: Flags) -> Result<Option<Duration>, Errno> {
        if flags.is_nonblocking() {
            return Ok(Some(Duration::ZERO));
        }
        let fabric = self.fabric();
        let s = fabric.socket(sock)?;
        Ok(match queue {
            Queue::Send => s.opts.send_timeout,
            Queue::Recv => s.opts.recv_timeout,
        })
    }

    /// Send `msg`, blocking until it is queued at a peer.
    ///
    /// Honors `send-timeout`. With `NONBLOCK` a send that would wait fails
    /// with `Again`. On failure the message is handed back.
    pub fn send_msg(&self, sock: SocketId, msg: Msg, flags: Flags) -> Result<(), SendError> {
        let timeout = match self.timeout_for(sock, Queue::Send, flags) {
            Ok(t) => t,
            Err(err) => return Err(SendError::new(err, msg)),
        };
        let aio = self.blocking_aio();
        aio.set_timeout(timeout);
        aio.set_msg(Some(msg));
        if let Err(err) = self.submit_send(sock, &aio) {
            return Err(SendError::new(err, aio.take_msg().unwrap_or_default()));
        }
        aio.wait();
        aio.result().map_err(|err| {
            SendError::new(blocking_errno(err, flags), aio.take_msg().unwrap_or_default())
        })
    }

    /// Receive a message, blocking until one arrives.
    ///
    /// Honors `recv-timeout`; `NONBLOCK` as for [`send_msg`](Self::send_msg).
    pub fn recv_msg(&self, sock: SocketId, flags: Flags) -> Result<Msg, Errno> {
        let timeout = self.timeout_for(sock, Queue::Recv, flags)?;
        let aio = self.blocking_aio();
        aio.set_timeout(timeout);
        self.submit_recv(sock, &aio)?;
        aio.wait();
        aio.result().map_err(|err| blocking_errno(err, flags))?;
        aio.take_msg().ok_or(Errno::Internal)
    }

    /// Send bytes as a message body
    pub fn send(&self, sock: SocketId, data: &[u8], flags: Flags) -> Result<(), Errno> {
        self.send_msg(sock, Msg::from(data), flags).map_err(Errno::from)
    }

    /// Receive a message body
    pub fn recv(&self, sock: SocketId, flags: Flags) -> Result<Vec<u8>, Errno> {
        self.recv_msg(sock, flags).map(Msg::into_body)
    }

    // ------------------------------------------------------------------
    // Listeners and dialers
    // ------------------------------------------------------------------

    /// Create a listener without starting it
    pub fn create_listener(&self, sock: SocketId, url: &str) -> Result<ListenerId, Errno> {
        self.fabric().create_listener(sock, url)
    }

    /// Bind a created listener. Pending dialers for the address connect.
    pub fn start_listener(&self, id: ListenerId, _flags: Flags) -> Result<(), Errno> {
        self.fabric().start_listener(id)
    }

    /// Create and start a listener
    pub fn listen(&self, sock: SocketId, url: &str, flags: Flags) -> Result<ListenerId, Errno> {
        let mut fabric = self.fabric();
        let id = fabric.create_listener(sock, url)?;
        if let Err(err) = fabric.start_listener(id) {
            let _ = fabric.close_listener(id);
            return Err(err);
        }
        kdebug!("{} listen {} ({:?})", sock, url, flags);
        Ok(id)
    }

    /// Close a listener and the pipes it accepted
    pub fn close_listener(&self, id: ListenerId) -> Result<(), Errno> {
        self.fabric().close_listener(id)
    }

    /// Address a listener is (or will be) bound to
    pub fn listener_url(&self, id: ListenerId) -> Result<String, Errno> {
        self.fabric().listener_url(id)
    }

    /// Create a dialer without starting it
    pub fn create_dialer(&self, sock: SocketId, url: &str) -> Result<DialerId, Errno> {
        self.fabric().create_dialer(sock, url)
    }

    /// Connect a created dialer. Without a listener this fails with
    /// `ConnRefused`, unless `NONBLOCK` is given, in which case the dialer
    /// connects once a listener starts on the address.
    pub fn start_dialer(&self, id: DialerId, flags: Flags) -> Result<(), Errno> {
        self.fabric().start_dialer(id, flags)
    }

    /// Create and start a dialer
    pub fn dial(&self, sock: SocketId, url: &str, flags: Flags) -> Result<DialerId, Errno> {
        let mut fabric = self.fabric();
        let id = fabric.create_dialer(sock, url)?;
        if let Err(err) = fabric.start_dialer(id, flags) {
            let _ = fabric.close_dialer(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Close a dialer and its pipe
    pub fn close_dialer(&self, id: DialerId) -> Result<(), Errno> {
        self.fabric().close_dialer(id)
    }

    /// Address a dialer connects to
    pub fn dialer_url(&self, id: DialerId) -> Result<String, Errno> {
        self.fabric().dialer_url(id)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    /// Completion pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Timer heap counters
    pub fn timer_stats(&self) -> HeapTimerStats {
        self.inner.timers.stats()
    }
}

fn blocking_errno(err: Errno, flags: Flags) -> Errno {
    if flags.is_nonblocking() && err == Errno::TimedOut {
        Errno::Again
    } else {
        err
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn engine() -> Engine {
        Engine::new(EngineConfig::new().num_workers(2).recv_buffer(4)).unwrap()
    }

    fn pair(engine: &Engine, a: Protocol, b: Protocol, url: &str) -> (SocketId, SocketId) {
        let s1 = engine.open(a).unwrap();
        let s2 = engine.open(b).unwrap();
        engine.listen(s1, url, Flags::NONE).unwrap();
        engine.dial(s2, url, Flags::NONE).unwrap();
        (s1, s2)
    }

    #[test]
    fn test_push_pull_roundtrip() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://pp");
        e.send(push, b"hello", Flags::NONE).unwrap();
        assert_eq!(e.recv(pull, Flags::NONE).unwrap(), b"hello");
    }

    #[test]
    fn test_wrong_direction_is_notsup() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://dir");
        assert_eq!(e.send(pull, b"x", Flags::NONE), Err(Errno::NotSup));
        assert_eq!(e.recv(push, Flags::NONE), Err(Errno::NotSup));
    }

    #[test]
    fn test_nonblocking_without_peer_is_again() {
        let e = engine();
        let push = e.open(Protocol::Push0).unwrap();
        let err = e
            .send_msg(push, Msg::from_body(vec![1, 2, 3]), Flags::NONBLOCK)
            .unwrap_err();
        assert_eq!(err.errno, Errno::Again);
        assert_eq!(err.msg.body(), &[1, 2, 3]);

        let pull = e.open(Protocol::Pull0).unwrap();
        assert_eq!(e.recv(pull, Flags::NONBLOCK), Err(Errno::Again));
    }

    #[test]
    fn test_recv_timeout_option() {
        let e = engine();
        let pull = e.open(Protocol::Pull0).unwrap();
        e.set_opt(pull, "recv-timeout", OptValue::Int(40)).unwrap();
        let start = Instant::now();
        assert_eq!(e.recv(pull, Flags::NONE), Err(Errno::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_round_robin_across_pulls() {
        let e = engine();
        let push = e.open(Protocol::Push0).unwrap();
        let a = e.open(Protocol::Pull0).unwrap();
        let b = e.open(Protocol::Pull0).unwrap();
        e.listen(push, "inproc://rr", Flags::NONE).unwrap();
        e.dial(a, "inproc://rr", Flags::NONE).unwrap();
        e.dial(b, "inproc://rr", Flags::NONE).unwrap();

        for i in 0..4u8 {
            e.send(push, &[i], Flags::NONE).unwrap();
        }
        assert_eq!(e.recv(a, Flags::NONE).unwrap(), vec![0]);
        assert_eq!(e.recv(b, Flags::NONE).unwrap(), vec![1]);
        assert_eq!(e.recv(a, Flags::NONE).unwrap(), vec![2]);
        assert_eq!(e.recv(b, Flags::NONE).unwrap(), vec![3]);
    }

    #[test]
    fn test_pub_broadcasts_to_every_sub() {
        let e = engine();
        let publisher = e.open(Protocol::Pub0).unwrap();
        e.listen(publisher, "inproc://news", Flags::NONE).unwrap();
        let subs: Vec<SocketId> = (0..3)
            .map(|_| {
                let s = e.open(Protocol::Sub0).unwrap();
                e.dial(s, "inproc://news", Flags::NONE).unwrap();
                s
            })
            .collect();

        e.send(publisher, b"tick", Flags::NONE).unwrap();
        for s in subs {
            assert_eq!(e.recv(s, Flags::NONE).unwrap(), b"tick");
        }
    }

    #[test]
    fn test_rep_replies_on_request_pipe() {
        let e = engine();
        let rep = e.open(Protocol::Rep0).unwrap();
        e.listen(rep, "inproc://svc", Flags::NONE).unwrap();
        let r1 = e.open(Protocol::Req0).unwrap();
        let r2 = e.open(Protocol::Req0).unwrap();
        e.dial(r1, "inproc://svc", Flags::NONE).unwrap();
        e.dial(r2, "inproc://svc", Flags::NONE).unwrap();

        assert_eq!(e.send(rep, b"unsolicited", Flags::NONE), Err(Errno::State));

        e.send(r2, b"from-2", Flags::NONE).unwrap();
        let req = e.recv_msg(rep, Flags::NONE).unwrap();
        assert!(req.pipe().is_some());
        let mut reply = Msg::from_body(b"re:from-2".to_vec());
        reply.set_pipe(req.pipe());
        e.send_msg(rep, reply, Flags::NONE).unwrap();

        assert_eq!(e.recv(r2, Flags::NONE).unwrap(), b"re:from-2");
        assert_eq!(e.recv(r1, Flags::NONBLOCK), Err(Errno::Again));
    }

    #[test]
    fn test_backpressure_resumes_blocked_sender() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://bp");
        e.set_opt(pull, "recv-buffer", OptValue::Size(1)).unwrap();
        e.send(push, b"1", Flags::NONE).unwrap();
        assert_eq!(e.send(push, b"2", Flags::NONBLOCK), Err(Errno::Again));

        let e2 = e.clone();
        let sender = thread::spawn(move || e2.send(push, b"2", Flags::NONE));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(e.recv(pull, Flags::NONE).unwrap(), b"1");
        assert_eq!(sender.join().unwrap(), Ok(()));
        assert_eq!(e.recv(pull, Flags::NONE).unwrap(), b"2");
    }

    #[test]
    fn test_listen_and_dial_errors() {
        let e = engine();
        let a = e.open(Protocol::Pair0).unwrap();
        let b = e.open(Protocol::Pair0).unwrap();
        let c = e.open(Protocol::Req0).unwrap();
        e.listen(a, "inproc://dup", Flags::NONE).unwrap();
        assert_eq!(e.listen(b, "inproc://dup", Flags::NONE), Err(Errno::AddrInUse));
        assert_eq!(e.dial(b, "inproc://nobody", Flags::NONE), Err(Errno::ConnRefused));
        assert_eq!(e.dial(c, "inproc://dup", Flags::NONE), Err(Errno::Proto));
        assert_eq!(e.dial(b, "tcp://127.0.0.1:1", Flags::NONE), Err(Errno::NotSup));
        assert_eq!(e.listen(b, "bad", Flags::NONE), Err(Errno::AddrInval));
    }

    #[test]
    fn test_nonblocking_dial_waits_for_listener() {
        let e = engine();
        let pair_a = e.open(Protocol::Pair0).unwrap();
        let pair_b = e.open(Protocol::Pair0).unwrap();
        let d = e.dial(pair_b, "inproc://later", Flags::NONBLOCK).unwrap();
        assert_eq!(e.dialer_url(d).unwrap(), "inproc://later");
        assert_eq!(e.send(pair_b, b"early", Flags::NONBLOCK), Err(Errno::Again));

        let l = e.create_listener(pair_a, "inproc://later").unwrap();
        e.start_listener(l, Flags::NONE).unwrap();
        assert_eq!(e.start_listener(l, Flags::NONE), Err(Errno::State));
        e.send(pair_b, b"late", Flags::NONE).unwrap();
        assert_eq!(e.recv(pair_a, Flags::NONE).unwrap(), b"late");
    }

    #[test]
    fn test_close_listener_frees_address_and_pipes() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://reuse");
        let l = e.listen(push, "inproc://other", Flags::NONE).unwrap();
        e.close_listener(l).unwrap();
        assert_eq!(e.close_listener(l), Err(Errno::Closed));
        assert!(e.listen(pull, "inproc://other", Flags::NONE).is_ok());
    }

    static CLOSED_HITS: AtomicUsize = AtomicUsize::new(0);

    fn on_closed(_token: u64) {
        CLOSED_HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_close_fails_pending_recv() {
        let e = engine();
        let pull = e.open(Protocol::Pull0).unwrap();
        let aio = e.alloc_aio(on_closed, 9).unwrap();
        e.submit_recv(pull, &aio).unwrap();
        assert_eq!(e.submit_recv(pull, &aio), Err(Errno::Busy));
        e.close(pull).unwrap();
        aio.wait();
        assert_eq!(aio.result(), Err(Errno::Closed));
        assert_eq!(CLOSED_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(e.close(pull), Err(Errno::Closed));
    }

    #[test]
    fn test_close_all_empties_registry() {
        let e = engine();
        for p in [Protocol::Bus0, Protocol::Pair0, Protocol::Rep0] {
            e.open(p).unwrap();
        }
        assert_eq!(e.socket_ids().len(), 3);
        e.close_all();
        assert!(e.socket_ids().is_empty());
    }

    fn noop(_token: u64) {}

    #[test]
    fn test_aio_limit() {
        let e = Engine::new(EngineConfig::new().num_workers(1).max_aios(2)).unwrap();
        let a = e.alloc_aio(noop, 1).unwrap();
        let _b = e.alloc_aio(noop, 2).unwrap();
        assert_eq!(e.alloc_aio(noop, 3).err(), Some(Errno::NoMem));
        drop(a);
        assert_eq!(e.live_aios(), 1);
        assert!(e.alloc_aio(noop, 4).is_ok());
    }

    #[test]
    fn test_late_timeout_does_not_finish_next_cycle() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://late-timeout");
        let aio = e.alloc_aio(noop, 21).unwrap();
        let sender = e.alloc_aio(noop, 22).unwrap();

        aio.set_timeout(Some(Duration::from_millis(30)));
        e.submit_recv(pull, &aio).unwrap();
        {
            // Timer fires and its cancel hook blocks on the fabric lock.
            let mut fabric = e.fabric();
            thread::sleep(Duration::from_millis(150));

            sender.set_msg(Some(Msg::from_body(b"first".to_vec())));
            let g = sender.core.begin().unwrap();
            let cancel = e.cancel_hook(push, Queue::Send, &sender, g);
            fabric.submit_send(push, &sender, cancel);
            assert!(!aio.is_active());
            assert_eq!(aio.result(), Ok(()));

            aio.set_timeout(None);
            let g = aio.core.begin().unwrap();
            let cancel = e.cancel_hook(pull, Queue::Recv, &aio, g);
            fabric.submit_recv(pull, &aio, cancel);
        }
        thread::sleep(Duration::from_millis(100));
        assert!(aio.is_active(), "second cycle finished by the first cycle's timer");

        e.send(push, b"second", Flags::NONE).unwrap();
        aio.wait();
        assert_eq!(aio.result(), Ok(()));
        assert_eq!(aio.take_msg().map(|m| m.body().to_vec()), Some(b"second".to_vec()));
    }

    #[test]
    fn test_invalid_config_is_inval() {
        let err = Engine::new(EngineConfig::new().num_workers(0)).err();
        assert_eq!(err, Some(Errno::Inval));
    }

    #[test]
    fn test_global_is_shared() {
        let a = Engine::global().unwrap();
        let b = Engine::global().unwrap();
        assert!(a.ptr_eq(b));
        assert!(a.clone().ptr_eq(b));
    }

    #[test]
    fn test_stats_track_timeouts() {
        let e = engine();
        assert_eq!(e.pool_stats().workers, 2);
        let pull = e.open(Protocol::Pull0).unwrap();
        e.set_opt(pull, "recv-timeout", OptValue::Int(5)).unwrap();
        assert_eq!(e.recv(pull, Flags::NONE), Err(Errno::TimedOut));
        let timers = e.timer_stats();
        assert_eq!(timers.total_inserted, 1);
        assert_eq!(timers.total_fired, 1);
    }

    #[test]
    fn test_options_by_name() {
        let e = engine();
        let s = e.open(Protocol::Surveyor0).unwrap();
        assert_eq!(e.get_opt(s, "protocol"), Ok(OptValue::Int(0x62)));
        assert_eq!(e.get_opt(s, "nope"), Err(Errno::NotSup));
        e.set_opt(s, "socket-name", OptValue::Str("survey".into()))
            .unwrap();
        assert_eq!(e.get_opt(s, "socket-name"), Ok(OptValue::Str("survey".into())));
        assert_eq!(
            e.set_opt(s, "compat:domain", OptValue::Int(2)),
            Err(Errno::ReadOnly)
        );
    }

    #[test]
    fn test_recv_size_max_drops_large_messages() {
        let e = engine();
        let (pull, push) = pair(&e, Protocol::Pull0, Protocol::Push0, "inproc://max");
        e.set_opt(pull, "recv-size-max", OptValue::Size(4)).unwrap();
        e.send(push, b"too long", Flags::NONE).unwrap();
        e.send(push, b"ok", Flags::NONE).unwrap();
        assert_eq!(e.recv(pull, Flags::NONE).unwrap(), b"ok");
    }

    #[test]
    fn test_bus_self_excluding_broadcast() {
        let e = engine();
        let hub = e.open(Protocol::Bus0).unwrap();
        e.listen(hub, "inproc://bus", Flags::NONE).unwrap();
        let n1 = e.open(Protocol::Bus0).unwrap();
        let n2 = e.open(Protocol::Bus0).unwrap();
        e.dial(n1, "inproc://bus", Flags::NONE).unwrap();
        e.dial(n2, "inproc://bus", Flags::NONE).unwrap();

        e.send(n1, b"hi", Flags::NONE).unwrap();
        assert_eq!(e.recv(hub, Flags::NONE).unwrap(), b"hi");
        assert_eq!(e.recv(n2, Flags::NONBLOCK), Err(Errno::Again));
        assert_eq!(e.recv(n1, Flags::NONBLOCK), Err(Errno::Again));
    }
}
