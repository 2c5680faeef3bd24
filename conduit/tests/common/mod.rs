#![allow(dead_code)]

use std::sync::Arc;

use conduit::{BufferSpec, Context, Handler, HandlerFault};
use parking_lot::Mutex;

/// Stateless byte relay in both directions.
pub struct ByteRelay;

impl Handler for ByteRelay {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn is_sharable(&self) -> bool {
        true
    }
}

/// Stateless inbound message relay.
pub struct MessageRelay;

impl Handler for MessageRelay {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::messages())
    }

    fn is_sharable(&self) -> bool {
        true
    }
}

/// Inbound byte stage that keeps everything it is given until removed.
pub struct Hoarder;

impl Handler for Hoarder {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn inbound_updated(&self, _ctx: &Context<'_>) -> Result<(), HandlerFault> {
        Ok(())
    }

    fn flush(&self, _ctx: &Context<'_>) -> Result<(), HandlerFault> {
        Ok(())
    }
}

/// Shared event log written by [`Recorder`] handlers.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Byte relay that appends `"<label>:<event>"` to a journal before forwarding.
pub struct Recorder {
    label: &'static str,
    journal: Journal,
}

impl Recorder {
    pub fn new(label: &'static str, journal: &Journal) -> Arc<dyn Handler> {
        Arc::new(Self {
            label,
            journal: journal.clone(),
        })
    }

    fn note(&self, event: &str) {
        self.journal.lock().push(format!("{}:{}", self.label, event));
    }
}

impl Handler for Recorder {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::bytes())
    }

    fn handler_added(&self, _ctx: &Context<'_>) {
        self.note("added");
    }

    fn handler_removed(&self, _ctx: &Context<'_>) {
        self.note("removed");
    }

    fn transport_active(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.note("active");
        ctx.fire_transport_active();
        Ok(())
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.note("read");
        ctx.forward_inbound();
        ctx.fire_inbound_updated();
        Ok(())
    }

    fn read_eof(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.note("eof");
        ctx.fire_read_eof();
        Ok(())
    }

    fn exception_caught(&self, ctx: &Context<'_>, fault: HandlerFault) -> Result<(), HandlerFault> {
        self.note("fault");
        ctx.fire_exception_caught(fault);
        Ok(())
    }

    fn flush(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.note("flush");
        ctx.forward_outbound();
        ctx.flush();
        Ok(())
    }

    fn close(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.note("close");
        ctx.close();
        Ok(())
    }
}

/// Pointer identity of two handler handles.
pub fn same(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}
