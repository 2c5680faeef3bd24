mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::{MessageRelay, init_log};
use conduit::{BufferKind, BufferSpec, Context, Handler, HandlerFault, Pipeline, PipelineConfig};

/// Holds messages back until `batch` of them are queued.
struct Batcher {
    batch: usize,
}

impl Handler for Batcher {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::messages())
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        let queued = ctx.inbound_messages().map_or(0, |q| q.len());
        if queued >= self.batch {
            ctx.forward_inbound();
            ctx.fire_inbound_updated();
        }
        Ok(())
    }
}

fn message_pipeline() -> Pipeline {
    Pipeline::with_config(
        PipelineConfig::default()
            .with_name("concurrent")
            .with_transport(BufferKind::MessageQueue),
    )
}

#[test]
fn order_survives_concurrent_reconfiguration() {
    init_log();
    const N: u64 = 2_000;
    let pipeline = message_pipeline();
    pipeline
        .add_last("batch", Arc::new(Batcher { batch: 3 }))
        .unwrap()
        .add_last("relay", Arc::new(MessageRelay))
        .unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..N {
                pipeline.handle_read_message(Box::new(i));
            }
        });
        s.spawn(|| {
            for round in 0..200 {
                let extra = format!("extra{round}");
                pipeline
                    .add_after("batch", extra.as_str(), Arc::new(MessageRelay))
                    .unwrap();
                pipeline
                    .replace("relay", "relay", Arc::new(MessageRelay))
                    .unwrap();
                pipeline.remove(&extra).unwrap();
                if round % 20 == 0 {
                    pipeline.replace("batch", "batch", Arc::new(Batcher { batch: 2 })).unwrap();
                }
            }
        });
    });

    // anything still batched is handed on when the batcher goes away
    pipeline.remove("batch").unwrap();
    let received: Vec<u64> = pipeline
        .take_inbound_messages()
        .into_iter()
        .map(|m| *m.downcast::<u64>().unwrap())
        .collect();
    assert_eq!(received, (0..N).collect::<Vec<_>>());
    assert_eq!(pipeline.names(), ["relay"]);
}

/// Keeps working on its input for as long as it stays linked.
#[derive(Default)]
struct Worker {
    started: AtomicBool,
    saw_unlink: AtomicBool,
    removed: AtomicBool,
}

impl Handler for Worker {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.started.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.is_linked() && Instant::now() < deadline {
            thread::yield_now();
        }
        self.saw_unlink.store(!ctx.is_linked(), Ordering::SeqCst);
        Ok(())
    }

    fn handler_removed(&self, _ctx: &Context<'_>) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

#[test]
fn remove_does_not_wait_for_a_running_handler() {
    init_log();
    let pipeline = Pipeline::new();
    let worker = Arc::new(Worker::default());
    pipeline.add_last("work", worker.clone()).unwrap();

    thread::scope(|s| {
        s.spawn(|| pipeline.handle_read(b"job"));
        while !worker.started.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let began = Instant::now();
        pipeline.remove("work").unwrap();
        let waited = began.elapsed();
        assert!(waited < Duration::from_secs(1), "remove blocked for {waited:?}");
    });

    assert!(worker.saw_unlink.load(Ordering::SeqCst));
    assert!(worker.removed.load(Ordering::SeqCst));
    // the input it never consumed moves on to the tail
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"job");
    assert!(pipeline.is_empty());
}

#[test]
fn observers_never_see_a_torn_chain() {
    let pipeline = message_pipeline();
    pipeline
        .add_last("a", Arc::new(MessageRelay))
        .unwrap()
        .add_last("b", Arc::new(MessageRelay))
        .unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..500 {
                pipeline.add_after("a", "x", Arc::new(MessageRelay)).unwrap();
                pipeline.replace("x", "y", Arc::new(MessageRelay)).unwrap();
                pipeline.remove("y").unwrap();
            }
            done.store(true, Ordering::Release);
        });
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let names = pipeline.names();
                assert!(
                    names == ["a", "b"] || names == ["a", "x", "b"] || names == ["a", "y", "b"],
                    "unexpected chain {names:?}"
                );
            }
        });
    });

    assert_eq!(pipeline.epoch(), 2 + 3 * 500);
}

#[test]
fn pipelines_on_separate_threads_share_a_handler() {
    let shared: Arc<dyn Handler> = Arc::new(MessageRelay);
    thread::scope(|s| {
        for t in 0..4u64 {
            let shared = shared.clone();
            s.spawn(move || {
                let pipeline = message_pipeline();
                pipeline.add_last("relay", shared).unwrap();
                for i in 0..100 {
                    pipeline.handle_read_message(Box::new(t * 1_000 + i));
                }
                let received = pipeline.take_inbound_messages();
                assert_eq!(received.len(), 100);
                assert_eq!(*received[0].downcast_ref::<u64>().unwrap(), t * 1_000);
            });
        }
    });
}
