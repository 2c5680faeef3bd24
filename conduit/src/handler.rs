//! # Handler Trait - Named Stages of a Pipeline
//!
//! The [`Handler`] trait is the building block of a [`Pipeline`](crate::Pipeline). Every
//! handler is registered under a unique name and sits at one position of the chain. Events
//! travel through the chain in two directions:
//!
//! - **Inbound**: from the transport (head) toward the application (tail).
//! - **Outbound**: from the application (tail) toward the transport (head).
//!
//! ## Buffers instead of typed messages
//!
//! Handlers do not receive payloads as call arguments. Instead each handler declares, per
//! direction, a [`BufferSpec`]: the kind of buffer holder it reads from (`input`) and the
//! kind it writes into (`output`). The pipeline allocates the input holder on the handler's
//! entry when it is added; a predecessor fills it and then signals the handler with
//! [`inbound_updated`](Handler::inbound_updated) (inbound) or [`flush`](Handler::flush)
//! (outbound).
//!
//! ```text
//!   head ──▶ [decoder] ──▶ [app] ──▶ tail        inbound
//!            bytes→msgs    msgs→msgs
//!
//!   head ◀── [encoder] ◀────────────── tail       outbound
//!            msgs→bytes
//! ```
//!
//! Adjacent handlers must agree on the kind they exchange; a disagreement is rejected when
//! the handler is added (see [`PipelineError::BufferKindMismatch`](crate::PipelineError)).
//!
//! ## Example: Upper-casing Handler
//!
//! ```rust
//! use conduit::{BufferSpec, Context, Handler, HandlerFault};
//!
//! struct Upper;
//!
//! impl Handler for Upper {
//!     fn inbound(&self) -> Option<BufferSpec> {
//!         Some(BufferSpec::bytes())
//!     }
//!
//!     fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
//!         if let Some(input) = ctx.inbound_bytes() {
//!             let data = input.take();
//!             ctx.next_inbound_bytes().append(&data.to_ascii_uppercase());
//!         }
//!         ctx.fire_inbound_updated();
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Event Handling
//!
//! Every event method has a default implementation that forwards the event unchanged, so a
//! handler only overrides what it cares about:
//!
//! - **`transport_active`** / **`transport_inactive`**: connection established / closed
//! - **`inbound_updated`**: data was staged in the handler's inbound holder
//! - **`read_eof`**: the peer finished sending
//! - **`handle_timeout`** / **`poll_timeout`**: timer driven work
//! - **`user_event`**: application-defined notifications
//! - **`exception_caught`**: a fault raised by an earlier handler
//! - **`flush`**: data was staged in the handler's outbound holder
//! - **`close`**: a close request travelling toward the transport
//!
//! A handler that returns `Err` from an event raises a [`HandlerFault`]. The pipeline offers
//! the fault to the next handler's `exception_caught` in the same direction; a fault nobody
//! consumes is reported to the pipeline owner.
//!
//! ## Sharing
//!
//! Handlers take `&self`, so a single `Arc<dyn Handler>` can be registered several times.
//! This is only permitted when [`is_sharable`](Handler::is_sharable) returns `true`;
//! stateful handlers keep the default and may be bound to one entry at a time.

use std::{fmt, time::Instant};

use serde::{Deserialize, Serialize};

use crate::buffer::{BufferKind, Message};
use crate::context::Context;
use crate::error::HandlerFault;

/// The two traversal directions of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Head to tail (reads).
    Inbound,
    /// Tail to head (writes).
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// A handler's buffer declaration for one direction.
///
/// `input` is the kind of holder allocated on the handler's own entry, `output` the kind it
/// writes into for the next handler in the same direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferSpec {
    /// Kind the handler consumes.
    pub input: BufferKind,
    /// Kind the handler produces.
    pub output: BufferKind,
}

impl BufferSpec {
    /// Creates a declaration with explicit input and output kinds.
    pub const fn new(input: BufferKind, output: BufferKind) -> Self {
        Self { input, output }
    }

    /// Bytes in, bytes out.
    pub const fn bytes() -> Self {
        Self::new(BufferKind::ByteStream, BufferKind::ByteStream)
    }

    /// Messages in, messages out.
    pub const fn messages() -> Self {
        Self::new(BufferKind::MessageQueue, BufferKind::MessageQueue)
    }

    /// Bytes in, messages out.
    pub const fn decoder() -> Self {
        Self::new(BufferKind::ByteStream, BufferKind::MessageQueue)
    }

    /// Messages in, bytes out.
    pub const fn encoder() -> Self {
        Self::new(BufferKind::MessageQueue, BufferKind::ByteStream)
    }
}

/// The set of directions a handler takes part in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    inbound: bool,
    outbound: bool,
}

impl Capabilities {
    /// Derives the capability set from a handler's buffer declarations.
    pub fn of(handler: &dyn Handler) -> Self {
        Self {
            inbound: handler.inbound().is_some(),
            outbound: handler.outbound().is_some(),
        }
    }

    /// Whether the handler receives events travelling in `direction`.
    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }

    /// Whether the handler takes part in neither direction.
    pub fn is_empty(&self) -> bool {
        !self.inbound && !self.outbound
    }
}

/// A named processing stage of a [`Pipeline`](crate::Pipeline).
///
/// All event methods receive a [`Context`] bound to the handler's entry. The context exposes
/// the entry's own buffer holders, the holders of the next handler in either direction, and
/// the `fire_*` methods that pass an event on.
///
/// See the [module-level documentation](self) for an overview.
pub trait Handler: Send + Sync + 'static {
    /// Buffer declaration for the inbound direction, or `None` if the handler does not
    /// process inbound events.
    fn inbound(&self) -> Option<BufferSpec> {
        None
    }

    /// Buffer declaration for the outbound direction, or `None` if the handler does not
    /// process outbound events.
    fn outbound(&self) -> Option<BufferSpec> {
        None
    }

    /// Whether this instance may be bound to several entries at once.
    ///
    /// Only stateless handlers should return `true`.
    fn is_sharable(&self) -> bool {
        false
    }

    /// Called once the handler's entry has been published in the chain.
    fn handler_added(&self, _ctx: &Context<'_>) {}

    /// Called once the handler's entry has been unlinked from the chain.
    ///
    /// Anything still staged in the entry's holders has already been forwarded when this
    /// runs.
    fn handler_removed(&self, _ctx: &Context<'_>) {}

    /// The transport became active.
    fn transport_active(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.fire_transport_active();
        Ok(())
    }

    /// The transport became inactive.
    fn transport_inactive(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.fire_transport_inactive();
        Ok(())
    }

    /// Data was staged in this handler's inbound holder.
    ///
    /// The default moves everything to the next inbound holder of the same kind and
    /// signals the next handler.
    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.forward_inbound();
        ctx.fire_inbound_updated();
        Ok(())
    }

    /// The peer will send no more data.
    fn read_eof(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.fire_read_eof();
        Ok(())
    }

    /// A timer deadline has passed.
    fn handle_timeout(&self, ctx: &Context<'_>, now: Instant) -> Result<(), HandlerFault> {
        ctx.fire_handle_timeout(now);
        Ok(())
    }

    /// Lowers `eto` to the earliest instant this handler wants `handle_timeout` called.
    fn poll_timeout(&self, ctx: &Context<'_>, eto: &mut Instant) {
        ctx.fire_poll_timeout(eto);
    }

    /// An application-defined event.
    fn user_event(&self, ctx: &Context<'_>, event: Message) -> Result<(), HandlerFault> {
        ctx.fire_user_event(event);
        Ok(())
    }

    /// A fault raised by an earlier handler in the same direction.
    ///
    /// Returning `Ok(())` without forwarding consumes the fault. Returning `Err` raises a
    /// new fault from this handler.
    fn exception_caught(&self, ctx: &Context<'_>, fault: HandlerFault) -> Result<(), HandlerFault> {
        ctx.fire_exception_caught(fault);
        Ok(())
    }

    /// Data was staged in this handler's outbound holder.
    ///
    /// The default moves everything to the next outbound holder of the same kind and
    /// flushes onward.
    fn flush(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.forward_outbound();
        ctx.flush();
        Ok(())
    }

    /// A close request travelling toward the transport.
    fn close(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.close();
        Ok(())
    }
}

impl fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}
