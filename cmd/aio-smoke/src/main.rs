//! msgbridge End-to-End Smoke Test
//!
//! Drives completion handles against a live engine:
//!   Part A: receive timeout: one callback, TimedOut, no payload
//!   Part B: send through a handle, blocking receive at the peer
//!   Part C: receive then immediate cancel
//!   Part D: receive then free: forced callback, later use rejected
//!   Part E: domains, slot exhaustion, request/reply over handles
//!
//! Run: ./target/release/aio-smoke
//! Engine settings come from MSGB_* environment variables.

use msgbridge::{
    Aio, Direction, Domain, Engine, EngineConfig, Errno, Error, Flags, HandleState, Inline, Msg,
    Protocol, Socket,
};
use msgbridge_core::kprint::{log_level, LogLevel};

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// What a callback saw.
#[derive(Debug)]
struct Event {
    result: Result<(), Errno>,
    msg: Option<Msg>,
    domain: String,
}

type Tx = Mutex<Sender<Event>>;

fn report(aio: &Aio, tx: &Tx) {
    let event = Event {
        result: aio.result(),
        msg: aio.take_msg().ok().flatten(),
        domain: Domain::current().name().to_string(),
    };
    let _ = tx.lock().map(|tx| tx.send(event));
}

/// Handle whose callback reports into a channel.
fn reporting(engine: &Engine) -> Result<(Aio, Receiver<Event>), Error> {
    let (tx, rx) = mpsc::channel();
    let aio = Aio::new_in(engine, report, Mutex::new(tx))?;
    Ok((aio, rx))
}

const PATIENCE: Duration = Duration::from_secs(5);

/// Count events arriving within `settle`.
fn drain(rx: &Receiver<Event>, settle: Duration) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.recv_timeout(settle) {
        out.push(ev);
    }
    out
}

// ════════════════════════════════════════════════════════════
// Part A: Receive timeout
// ════════════════════════════════════════════════════════════

fn test_timeout(t: &mut TestRunner, engine: &Engine) {
    t.section("Part A: Receive with no peer, 50 ms timeout");

    let pull = match Socket::open_in(engine, Protocol::Pull0) {
        Ok(s) => s,
        Err(e) => return t.fail("open pull socket", &e.to_string()),
    };
    let (aio, rx) = match reporting(engine) {
        Ok(v) => v,
        Err(e) => return t.fail("create handle", &e.to_string()),
    };
    t.check(
        "set_timeout(50ms)",
        aio.set_timeout(Some(Duration::from_millis(50))).is_ok(),
        "rejected",
    );

    let start = Instant::now();
    t.check(
        "arm receive",
        aio.arm(&pull, Direction::Receive, None).is_ok(),
        "arm failed",
    );
    let first = rx.recv_timeout(PATIENCE);
    let elapsed = start.elapsed();
    match first {
        Ok(ev) => {
            t.check(
                "callback after >= 50ms",
                elapsed >= Duration::from_millis(50),
                &format!("fired after {:?}", elapsed),
            );
            t.check(
                "result is TimedOut",
                ev.result == Err(Errno::TimedOut),
                &format!("{:?}", ev.result),
            );
            t.check("no payload", ev.msg.is_none(), "payload present");
        }
        Err(_) => t.fail("callback fired", "no callback within 5s"),
    }
    let extra = drain(&rx, Duration::from_millis(50));
    t.check("exactly one callback", extra.is_empty(), &format!("{} extra", extra.len()));
}

// ════════════════════════════════════════════════════════════
// Part B: Send through a handle
// ════════════════════════════════════════════════════════════

fn test_send(t: &mut TestRunner, engine: &Engine) {
    t.section("Part B: 10-byte send through a handle");

    let (pull, push) = match (
        Socket::open_in(engine, Protocol::Pull0),
        Socket::open_in(engine, Protocol::Push0),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return t.fail("open push/pull", "open failed"),
    };
    let _listener = match pull.listen("inproc://smoke-b", Flags::NONE) {
        Ok(l) => l,
        Err(e) => return t.fail("listen", &e.to_string()),
    };
    let _dialer = match push.dial("inproc://smoke-b", Flags::NONE) {
        Ok(d) => d,
        Err(e) => return t.fail("dial", &e.to_string()),
    };
    t.pass("push dialed pull");

    let (aio, rx) = match reporting(engine) {
        Ok(v) => v,
        Err(e) => return t.fail("create handle", &e.to_string()),
    };
    let payload: Vec<u8> = (b'0'..=b'9').collect();
    t.check(
        "arm send with payload",
        aio.arm(&push, Direction::Send, Some(Msg::from_body(payload.clone())))
            .is_ok(),
        "arm failed",
    );
    match rx.recv_timeout(PATIENCE) {
        Ok(ev) => t.check("send result Ok", ev.result.is_ok(), &format!("{:?}", ev.result)),
        Err(_) => t.fail("send callback", "no callback within 5s"),
    }
    let _ = pull.set_ms("recv-timeout", Some(PATIENCE));
    match pull.recv(Flags::NONE) {
        Ok(body) => t.check("peer got the 10 bytes", body == payload, &format!("{:?}", body)),
        Err(e) => t.fail("peer receive", &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Cancel
// ════════════════════════════════════════════════════════════

fn test_cancel(t: &mut TestRunner, engine: &Engine) {
    t.section("Part C: Receive, then cancel");

    let pull = match Socket::open_in(engine, Protocol::Pull0) {
        Ok(s) => s,
        Err(e) => return t.fail("open pull socket", &e.to_string()),
    };
    let (aio, rx) = match reporting(engine) {
        Ok(v) => v,
        Err(e) => return t.fail("create handle", &e.to_string()),
    };

    aio.cancel();
    t.check(
        "cancel on idle handle is a no-op",
        aio.state() == HandleState::Idle && rx.try_recv().is_err(),
        "state changed or callback fired",
    );

    if let Err(e) = aio.arm(&pull, Direction::Receive, None) {
        return t.fail("arm receive", &e.to_string());
    }
    aio.cancel();
    match rx.recv_timeout(PATIENCE) {
        Ok(ev) => t.check(
            "result is Canceled",
            ev.result == Err(Errno::Canceled),
            &format!("{:?}", ev.result),
        ),
        Err(_) => t.fail("cancel callback", "no callback within 5s"),
    }
    let extra = drain(&rx, Duration::from_millis(50));
    t.check("exactly one callback", extra.is_empty(), &format!("{} extra", extra.len()));
}

// ════════════════════════════════════════════════════════════
// Part D: Free while armed
// ════════════════════════════════════════════════════════════

fn test_free(t: &mut TestRunner, engine: &Engine) {
    t.section("Part D: Receive, then free");

    let pull = match Socket::open_in(engine, Protocol::Pull0) {
        Ok(s) => s,
        Err(e) => return t.fail("open pull socket", &e.to_string()),
    };
    let (aio, rx) = match reporting(engine) {
        Ok(v) => v,
        Err(e) => return t.fail("create handle", &e.to_string()),
    };
    if let Err(e) = aio.arm(&pull, Direction::Receive, None) {
        return t.fail("arm receive", &e.to_string());
    }
    aio.free();
    match rx.try_recv() {
        Ok(ev) => t.check(
            "forced callback before free returned",
            ev.result == Err(Errno::Canceled),
            &format!("{:?}", ev.result),
        ),
        Err(_) => t.fail("forced callback before free returned", "none delivered"),
    }
    t.check("state is Freed", aio.state() == HandleState::Freed, "not freed");
    t.check(
        "re-arm rejected",
        matches!(
            aio.arm(&pull, Direction::Receive, None),
            Err(Error::InvalidState(_))
        ),
        "accepted",
    );
    t.check("result() reports State", aio.result() == Err(Errno::State), "other");
    aio.free();
    t.pass("second free is a no-op");
    t.check(
        "no callback after free",
        drain(&rx, Duration::from_millis(50)).is_empty(),
        "late callback",
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Domains, limits, request/reply
// ════════════════════════════════════════════════════════════

fn test_extras(t: &mut TestRunner, engine: &Engine) {
    t.section("Part E: Domains, slot limit, request/reply");

    // E1: callback runs in the creating domain
    let pull = match Socket::open_in(engine, Protocol::Pull0) {
        Ok(s) => s,
        Err(e) => return t.fail("open pull socket", &e.to_string()),
    };
    let app = Domain::new("smoke-app");
    match app.enter(|| reporting(engine)) {
        Ok(Ok((aio, rx))) => {
            let _ = aio.set_timeout(Some(Duration::ZERO));
            let _ = aio.arm(&pull, Direction::Receive, None);
            match rx.recv_timeout(PATIENCE) {
                Ok(ev) => t.check(
                    "callback in creating domain",
                    ev.domain == "smoke-app",
                    &ev.domain,
                ),
                Err(_) => t.fail("domain callback", "no callback within 5s"),
            }

            // E2: unloaded domain refuses the callback
            app.unload();
            let _ = aio.arm(&pull, Direction::Receive, None);
            aio.wait();
            t.check(
                "unloaded domain skips callback",
                rx.try_recv().is_err() && aio.state() == HandleState::Completed,
                "callback ran",
            );
        }
        _ => t.fail("create handle in domain", "failed"),
    }

    // E3: slot exhaustion
    match Engine::new(EngineConfig::new().num_workers(1).max_aios(1)) {
        Ok(small) => {
            let first = Aio::with_reentry(&small, Inline, |_: &Aio, _: &()| {}, ());
            let second = Aio::with_reentry(&small, Inline, |_: &Aio, _: &()| {}, ());
            t.check(
                "second slot is ResourceExhausted",
                first.is_ok() && matches!(second, Err(Error::ResourceExhausted)),
                "allocation not limited",
            );
        }
        Err(e) => t.fail("small engine", &e.to_string()),
    }

    // E4: request/reply
    let (rep, req) = match (
        Socket::open_in(engine, Protocol::Rep0),
        Socket::open_in(engine, Protocol::Req0),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return t.fail("open req/rep", "open failed"),
    };
    let (Ok(_l), Ok(_d)) = (
        rep.listen("inproc://smoke-rpc", Flags::NONE),
        req.dial("inproc://smoke-rpc", Flags::NONE),
    ) else {
        return t.fail("connect req/rep", "listen or dial failed");
    };
    let (Ok((server, srx)), Ok((client, crx))) = (reporting(engine), reporting(engine)) else {
        return t.fail("create rpc handles", "failed");
    };
    let _ = rep.recv_aio(&server);
    let _ = client.set_msg(Msg::from_body(b"ping".to_vec()));
    let _ = req.send_aio(&client);
    let request = srx.recv_timeout(PATIENCE).ok().and_then(|ev| ev.msg);
    let _ = crx.recv_timeout(PATIENCE);
    match request {
        Some(request) => {
            let mut reply = Msg::from_body(b"pong".to_vec());
            reply.set_pipe(request.pipe());
            let _ = server.arm(&rep, Direction::Send, Some(reply));
            let _ = req.recv_aio(&client);
            let _ = srx.recv_timeout(PATIENCE);
            let got = crx.recv_timeout(PATIENCE).ok().and_then(|ev| ev.msg);
            t.check(
                "reply routed back to requester",
                got.as_ref().map(Msg::body) == Some(&b"pong"[..]),
                &format!("{:?}", got),
            );
        }
        None => t.fail("request delivered", "no request"),
    }
}

fn main() {
    println!("=== msgbridge End-to-End Smoke Test ===");
    let config = EngineConfig::from_env();
    println!(
        "    workers: {}  max aios: {}  log: {:?}",
        config.num_workers,
        config.max_aios,
        log_level()
    );
    if log_level() >= LogLevel::Debug {
        println!("    (debug logging on; expect interleaved stderr)");
    }

    let mut t = TestRunner::new();

    let engine = match Engine::new(config) {
        Ok(e) => e,
        Err(e) => {
            println!("\nFATAL: engine failed to start: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };

    test_timeout(&mut t, &engine);
    test_send(&mut t, &engine);
    test_cancel(&mut t, &engine);
    test_free(&mut t, &engine);
    test_extras(&mut t, &engine);

    engine.close_all();
    let stats = engine.pool_stats();
    println!(
        "\n    pool: {} workers, {} dispatched, {} inline",
        stats.workers, stats.dispatched, stats.inline
    );

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
