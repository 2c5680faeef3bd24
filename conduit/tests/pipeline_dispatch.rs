mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{ByteRelay, Hoarder, MessageRelay, Recorder, init_log, journal};
use conduit::{
    BufferKind, BufferSpec, Context, FaultPolicy, Handler, HandlerFault, Message, Pipeline,
    PipelineConfig, PipelineError,
};
use parking_lot::Mutex;

fn drain(journal: &common::Journal) -> Vec<String> {
    std::mem::take(&mut *journal.lock())
}

#[test]
fn events_follow_structural_order() -> Result<(), PipelineError> {
    init_log();
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add_last("a", Recorder::new("a", &log))?
        .add_last("c", Recorder::new("c", &log))?
        .add_before("c", "b", Recorder::new("b", &log))?;
    assert_eq!(drain(&log), ["a:added", "c:added", "b:added"]);

    pipeline.transport_active();
    assert_eq!(drain(&log), ["a:active", "b:active", "c:active"]);

    pipeline.handle_read(b"ping");
    assert_eq!(drain(&log), ["a:read", "b:read", "c:read"]);
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"ping");

    pipeline.write_and_flush(Box::new(Bytes::from_static(b"pong")));
    assert_eq!(drain(&log), ["c:flush", "b:flush", "a:flush"]);
    assert_eq!(pipeline.poll_write().as_deref(), Some(&b"pong"[..]));

    pipeline.handle_eof();
    assert_eq!(drain(&log), ["a:eof", "b:eof", "c:eof"]);
    Ok(())
}

#[test]
fn removing_a_stage_forwards_what_it_held() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add_last("a", Arc::new(ByteRelay))?
        .add_last("hoard", Arc::new(Hoarder))?
        .add_last("r", Recorder::new("r", &log))?;
    drain(&log);

    pipeline.handle_read(b"xyz");
    pipeline.write_and_flush(Box::new(Bytes::from_static(b"out")));
    assert!(pipeline.take_inbound_bytes().is_empty());
    assert_eq!(pipeline.poll_write(), None);

    pipeline.remove("hoard")?;
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"xyz");
    assert_eq!(pipeline.poll_write().as_deref(), Some(&b"out"[..]));
    assert_eq!(drain(&log), ["r:flush", "r:read"]);
    Ok(())
}

#[test]
fn replace_hands_staged_data_to_the_new_handler() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline.add_last("stage", Arc::new(Hoarder))?;
    pipeline.handle_read(b"held");
    assert!(pipeline.take_inbound_bytes().is_empty());

    pipeline.replace("stage", "stage", Recorder::new("new", &log))?;
    assert_eq!(drain(&log), ["new:added", "new:read"]);
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"held");
    Ok(())
}

struct OutboundOnly;
impl Handler for OutboundOnly {
    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
}

#[test]
fn replace_with_other_kinds_forwards_onward() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    pipeline.add_last("stage", Arc::new(Hoarder))?;
    pipeline.handle_read(b"abc");

    pipeline.replace("stage", "out", Arc::new(OutboundOnly))?;
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"abc");
    assert_eq!(pipeline.names(), ["out"]);
    Ok(())
}

struct Failing;
impl Handler for Failing {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn inbound_updated(&self, _ctx: &Context<'_>) -> Result<(), HandlerFault> {
        Err("bad frame".into())
    }
}

/// Consumes faults and remembers where they came from.
#[derive(Default)]
struct Catcher {
    seen: Mutex<Vec<(Option<String>, String)>>,
}
impl Handler for Catcher {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn exception_caught(&self, _ctx: &Context<'_>, fault: HandlerFault) -> Result<(), HandlerFault> {
        self.seen
            .lock()
            .push((fault.origin().map(str::to_owned), fault.cause().to_string()));
        Ok(())
    }
}

#[test]
fn fault_is_offered_to_the_next_handler() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    let catcher = Arc::new(Catcher::default());
    pipeline
        .add_last("decoder", Arc::new(Failing))?
        .add_last("catcher", catcher.clone())?;

    pipeline.handle_read(b"junk");
    assert_eq!(
        *catcher.seen.lock(),
        [(Some("decoder".to_owned()), "bad frame".to_owned())]
    );
    assert!(pipeline.take_unhandled_faults().is_empty());
    assert!(!pipeline.is_closed());
    Ok(())
}

#[test]
fn unhandled_fault_closes_by_default() -> Result<(), PipelineError> {
    init_log();
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add_last("r", Recorder::new("r", &log))?
        .add_last("decoder", Arc::new(Failing))?;
    drain(&log);

    pipeline.handle_read(b"junk");
    let faults = pipeline.take_unhandled_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].origin(), Some("decoder"));
    assert_eq!(faults[0].to_string(), "handler \"decoder\" failed: bad frame");
    assert!(pipeline.is_closed());
    assert_eq!(drain(&log), ["r:read", "r:close"]);
    Ok(())
}

#[test]
fn ignore_policy_keeps_the_pipeline_open() -> Result<(), PipelineError> {
    let pipeline = Pipeline::with_config(
        PipelineConfig::default().with_fault_policy(FaultPolicy::Ignore),
    );
    pipeline.add_last("decoder", Arc::new(Failing))?;
    pipeline.handle_read(b"junk");
    pipeline.handle_read(b"more");
    assert_eq!(pipeline.take_unhandled_faults().len(), 2);
    assert!(!pipeline.is_closed());
    Ok(())
}

/// Converts any fault into its own.
struct Rethrow;
impl Handler for Rethrow {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn exception_caught(&self, _ctx: &Context<'_>, fault: HandlerFault) -> Result<(), HandlerFault> {
        Err(HandlerFault::msg(format!("wrapped: {}", fault.cause())))
    }
}

#[test]
fn fault_raised_while_handling_a_fault_travels_on() -> Result<(), PipelineError> {
    let pipeline = Pipeline::with_config(
        PipelineConfig::default().with_fault_policy(FaultPolicy::Ignore),
    );
    pipeline
        .add_last("decoder", Arc::new(Failing))?
        .add_last("rethrow", Arc::new(Rethrow))?
        .add_last("relay", Arc::new(ByteRelay))?;
    pipeline.handle_read(b"junk");

    let faults = pipeline.take_unhandled_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].origin(), Some("rethrow"));
    assert_eq!(faults[0].cause().to_string(), "wrapped: bad frame");
    Ok(())
}

/// Removes `victim` (or itself) the first time it sees data.
struct Remover {
    victim: &'static str,
}
impl Handler for Remover {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        if ctx.pipeline().contains(self.victim) {
            ctx.pipeline().remove(self.victim)?;
        }
        ctx.forward_inbound();
        ctx.fire_inbound_updated();
        Ok(())
    }
}

#[test]
fn handler_unlinked_mid_event_receives_nothing_more() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add_last("gate", Arc::new(Remover { victim: "victim" }))?
        .add_last("victim", Recorder::new("victim", &log))?
        .add_last("after", Recorder::new("after", &log))?;
    drain(&log);

    pipeline.handle_read(b"data");
    assert_eq!(drain(&log), ["victim:removed", "after:read"]);
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"data");
    assert_eq!(pipeline.names(), ["gate", "after"]);
    Ok(())
}

#[test]
fn handler_removing_itself_still_delivers_once() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline
        .add_last("once", Arc::new(Remover { victim: "once" }))?
        .add_last("after", Recorder::new("after", &log))?;
    drain(&log);

    pipeline.handle_read(b"first");
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"first");
    assert_eq!(pipeline.names(), ["after"]);

    pipeline.handle_read(b"second");
    assert_eq!(&pipeline.take_inbound_bytes()[..], b"second");
    Ok(())
}

/// Holds back the first close request and rejects every read.
#[derive(Default)]
struct Lingering {
    held: AtomicBool,
}
impl Handler for Lingering {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn inbound_updated(&self, _ctx: &Context<'_>) -> Result<(), HandlerFault> {
        Err("rejected".into())
    }
    fn close(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        if self.held.swap(true, Ordering::SeqCst) {
            ctx.close();
        }
        Ok(())
    }
}

#[test]
fn close_can_be_sent_again_after_a_handler_holds_it_back() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    pipeline.add_last("linger", Arc::new(Lingering::default()))?;

    pipeline.close();
    assert!(!pipeline.is_closed());
    pipeline.close();
    assert!(pipeline.is_closed());
    Ok(())
}

#[test]
fn unhandled_fault_closes_after_a_held_back_close() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    pipeline.add_last("linger", Arc::new(Lingering::default()))?;

    pipeline.close();
    assert!(!pipeline.is_closed());

    pipeline.handle_read(b"anything");
    assert_eq!(pipeline.take_unhandled_faults().len(), 1);
    assert!(pipeline.is_closed());
    Ok(())
}

#[test]
fn replace_calls_lifecycle_hooks_in_order() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    pipeline.add_last("x", Recorder::new("old", &log))?;
    pipeline.replace("x", "x", Recorder::new("new", &log))?;
    pipeline.remove("x")?;
    assert_eq!(
        drain(&log),
        ["old:added", "new:added", "old:removed", "new:removed"]
    );
    Ok(())
}

/// Echoes every inbound byte back toward the transport.
struct Echo;
impl Handler for Echo {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        if let Some(input) = ctx.inbound_bytes() {
            let data = input.take();
            ctx.write_and_flush(Box::new(data));
        }
        Ok(())
    }
}

#[test]
fn inbound_handler_can_write_toward_the_transport() -> Result<(), PipelineError> {
    let log = journal();
    let pipeline = Pipeline::new();
    let wakeups = Arc::new(AtomicUsize::new(0));
    let counter = wakeups.clone();
    pipeline.set_write_notify(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    pipeline
        .add_last("r", Recorder::new("r", &log))?
        .add_last("echo", Arc::new(Echo))?;
    drain(&log);

    pipeline.handle_read(b"hello");
    assert_eq!(drain(&log), ["r:read", "r:flush"]);
    assert_eq!(pipeline.poll_write().as_deref(), Some(&b"hello"[..]));
    assert_eq!(wakeups.load(Ordering::SeqCst), 1);
    assert!(pipeline.take_inbound_bytes().is_empty());
    Ok(())
}

/// Asks for a timer and counts how often it fires.
#[derive(Default)]
struct Ticker {
    fired: AtomicUsize,
}
impl Handler for Ticker {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn is_sharable(&self) -> bool {
        true
    }
    fn handle_timeout(&self, ctx: &Context<'_>, now: Instant) -> Result<(), HandlerFault> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        ctx.fire_handle_timeout(now);
        Ok(())
    }
    fn poll_timeout(&self, ctx: &Context<'_>, eto: &mut Instant) {
        let wanted = Instant::now() + Duration::from_millis(5);
        if wanted < *eto {
            *eto = wanted;
        }
        ctx.fire_poll_timeout(eto);
    }
}

#[test]
fn timers_reach_every_inbound_handler() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    let ticker = Arc::new(Ticker::default());
    pipeline
        .add_last("t1", ticker.clone())?
        .add_last("t2", ticker.clone())?;

    let far = Instant::now() + Duration::from_secs(60);
    let mut eto = far;
    pipeline.poll_timeout(&mut eto);
    assert!(eto < far);

    pipeline.handle_timeout(Instant::now());
    assert_eq!(ticker.fired.load(Ordering::SeqCst), 2);
    Ok(())
}

/// Counts user events and swallows those that are `u32`.
#[derive(Default)]
struct EventSink {
    count: AtomicUsize,
}
impl Handler for EventSink {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }
    fn user_event(&self, ctx: &Context<'_>, event: Message) -> Result<(), HandlerFault> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if !event.is::<u32>() {
            ctx.fire_user_event(event);
        }
        Ok(())
    }
}

#[test]
fn user_events_stop_where_they_are_consumed() -> Result<(), PipelineError> {
    let pipeline = Pipeline::new();
    let first = Arc::new(EventSink::default());
    let second = Arc::new(EventSink::default());
    pipeline
        .add_last("first", first.clone())?
        .add_last("second", second.clone())?;

    pipeline.fire_user_event(Box::new(1u32));
    pipeline.fire_user_event(Box::new("idle"));
    assert_eq!(first.count.load(Ordering::SeqCst), 2);
    assert_eq!(second.count.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn message_transport_delivers_values() -> Result<(), PipelineError> {
    let pipeline = Pipeline::with_config(
        PipelineConfig::default()
            .with_name("datagram")
            .with_transport(BufferKind::MessageQueue),
    );
    pipeline.add_last("relay", Arc::new(MessageRelay))?;

    pipeline.handle_read_message(Box::new(String::from("one")));
    pipeline.handle_read(b"two");
    let received = pipeline.take_inbound_messages();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].downcast_ref::<String>().map(String::as_str), Some("one"));
    assert_eq!(
        received[1].downcast_ref::<Bytes>().map(|b| &b[..]),
        Some(&b"two"[..])
    );
    Ok(())
}
