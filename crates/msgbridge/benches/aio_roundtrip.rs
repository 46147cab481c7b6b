//! Completion handle round-trip benchmarks using criterion.
//!
//! Run with: cargo bench --bench aio_roundtrip

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use msgbridge::{Aio, Direction, Engine, EngineConfig, Flags, Inline, Msg, Protocol, Socket};

fn engine() -> Engine {
    Engine::new(EngineConfig::new().num_workers(2)).expect("engine")
}

/// Arm, fail at once (zero timeout), callback, wait.
fn bench_immediate_completion(c: &mut Criterion) {
    let e = engine();
    let pull = Socket::open_in(&e, Protocol::Pull0).expect("socket");
    let aio = Aio::with_reentry(&e, Inline, |aio: &Aio, _: &()| {
        black_box(aio.result().is_err());
    }, ())
    .expect("aio");
    aio.set_timeout(Some(Duration::ZERO)).expect("timeout");

    c.bench_function("aio_immediate_completion", |b| {
        b.iter(|| {
            aio.arm(&pull, Direction::Receive, None).expect("arm");
            aio.wait();
        })
    });
}

/// Blocking push into a pull socket with an armed receive handle.
fn bench_push_pull(c: &mut Criterion) {
    let e = engine();
    let pull = Socket::open_in(&e, Protocol::Pull0).expect("socket");
    let push = Socket::open_in(&e, Protocol::Push0).expect("socket");
    let _l = pull.listen("inproc://bench", Flags::NONE).expect("listen");
    let _d = push.dial("inproc://bench", Flags::NONE).expect("dial");
    let aio = Aio::with_reentry(&e, Inline, |_: &Aio, _: &()| {}, ()).expect("aio");
    let payload = vec![0u8; 64];

    c.bench_function("aio_push_pull_64b", |b| {
        b.iter(|| {
            aio.arm(&pull, Direction::Receive, None).expect("arm");
            push.send_msg(Msg::from_body(payload.clone()), Flags::NONE)
                .expect("send");
            aio.wait();
            black_box(aio.take_msg().expect("take"));
        })
    });
}

/// Create and free a handle.
fn bench_create_free(c: &mut Criterion) {
    let e = engine();
    c.bench_function("aio_create_free", |b| {
        b.iter(|| {
            let aio = Aio::with_reentry(&e, Inline, |_: &Aio, _: &()| {}, ()).expect("aio");
            aio.free();
        })
    });
}

criterion_group!(
    benches,
    bench_immediate_completion,
    bench_push_pull,
    bench_create_free
);
criterion_main!(benches);
