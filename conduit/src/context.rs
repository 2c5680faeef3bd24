//! The per-invocation view a handler gets of its pipeline.

use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{BufferHolder, ByteStream, Message, MessageQueue};
use crate::entry::{Chain, Entry};
use crate::error::HandlerFault;
use crate::handler::{Direction, Handler};
use crate::pipeline::{Anchor, Event, Pipeline};

/// Handle given to a [`Handler`] for the duration of one event.
///
/// A context is bound to the handler's entry. It resolves "the next handler" against the
/// chain as currently published, so a handler inserted or removed while an event is in
/// flight is honoured by the very next hop.
pub struct Context<'p> {
    pipeline: &'p Pipeline,
    entry: Arc<Entry>,
    snapshot: Arc<Chain>,
    direction: Direction,
}

impl<'p> Context<'p> {
    pub(crate) fn new(
        pipeline: &'p Pipeline,
        entry: Arc<Entry>,
        snapshot: Arc<Chain>,
        direction: Direction,
    ) -> Self {
        Self {
            pipeline,
            entry,
            snapshot,
            direction,
        }
    }

    /// The pipeline this context belongs to.
    pub fn pipeline(&self) -> &'p Pipeline {
        self.pipeline
    }

    /// Name the handler is registered under.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// The handler this context is bound to.
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.entry.handler
    }

    /// Direction of the event being processed.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the entry is still linked in the published chain.
    pub fn is_linked(&self) -> bool {
        self.pipeline.current().contains_id(self.entry.id)
    }

    /// The entry's own inbound holder.
    pub fn inbound_buffer(&self) -> Option<&BufferHolder> {
        self.entry.inbound.as_ref()
    }

    /// The entry's own outbound holder.
    pub fn outbound_buffer(&self) -> Option<&BufferHolder> {
        self.entry.outbound.as_ref()
    }

    /// The entry's inbound holder, if it is a byte stream.
    pub fn inbound_bytes(&self) -> Option<&ByteStream> {
        self.inbound_buffer().and_then(BufferHolder::as_bytes)
    }

    /// The entry's inbound holder, if it is a message queue.
    pub fn inbound_messages(&self) -> Option<&MessageQueue> {
        self.inbound_buffer().and_then(BufferHolder::as_messages)
    }

    /// The entry's outbound holder, if it is a byte stream.
    pub fn outbound_bytes(&self) -> Option<&ByteStream> {
        self.outbound_buffer().and_then(BufferHolder::as_bytes)
    }

    /// The entry's outbound holder, if it is a message queue.
    pub fn outbound_messages(&self) -> Option<&MessageQueue> {
        self.outbound_buffer().and_then(BufferHolder::as_messages)
    }

    /// The nearest byte stream further inbound, or the tail's.
    pub fn next_inbound_bytes(&self) -> ByteStream {
        let (chain, anchor) = self.resolve(Direction::Inbound);
        self.pipeline.next_bytes(&chain, anchor, Direction::Inbound)
    }

    /// The nearest message queue further inbound, or the tail's.
    pub fn next_inbound_messages(&self) -> MessageQueue {
        let (chain, anchor) = self.resolve(Direction::Inbound);
        self.pipeline.next_messages(&chain, anchor, Direction::Inbound)
    }

    /// The nearest byte stream further outbound, or the head's.
    pub fn next_outbound_bytes(&self) -> ByteStream {
        let (chain, anchor) = self.resolve(Direction::Outbound);
        self.pipeline.next_bytes(&chain, anchor, Direction::Outbound)
    }

    /// The nearest message queue further outbound, or the head's.
    pub fn next_outbound_messages(&self) -> MessageQueue {
        let (chain, anchor) = self.resolve(Direction::Outbound);
        self.pipeline.next_messages(&chain, anchor, Direction::Outbound)
    }

    /// Moves everything in the entry's inbound holder to the next inbound holder of the
    /// same kind. Returns the number of bytes or messages moved.
    pub fn forward_inbound(&self) -> usize {
        self.forward(Direction::Inbound)
    }

    /// Moves everything in the entry's outbound holder to the next outbound holder of the
    /// same kind. Returns the number of bytes or messages moved.
    pub fn forward_outbound(&self) -> usize {
        self.forward(Direction::Outbound)
    }

    fn forward(&self, direction: Direction) -> usize {
        let Some(holder) = self.entry.holder(direction) else {
            return 0;
        };
        let (chain, anchor) = self.resolve(direction);
        let target = self.pipeline.next_holder(&chain, anchor, direction, holder.kind());
        holder.transfer_to(&target)
    }

    /// Passes `msg` on inbound: the first following holder that accepts it keeps it.
    pub fn pass_inbound(&self, msg: Message) {
        let (chain, anchor) = self.resolve(Direction::Inbound);
        self.pipeline.place(&chain, anchor, Direction::Inbound, msg);
    }

    /// Stages `msg` for the outbound handlers below this entry.
    ///
    /// Byte-like values may land in a byte stream; anything else goes to the nearest message
    /// queue, or to the head when none is left.
    pub fn write(&self, msg: Message) {
        let (chain, anchor) = self.resolve(Direction::Outbound);
        self.pipeline.place(&chain, anchor, Direction::Outbound, msg);
    }

    /// [`write`](Context::write) followed by [`flush`](Context::flush).
    pub fn write_and_flush(&self, msg: Message) {
        self.write(msg);
        self.flush();
    }

    /// Signals the next outbound handler that data was staged.
    pub fn flush(&self) {
        self.fire(Direction::Outbound, Event::Flush);
    }

    /// Passes a close request to the next outbound handler.
    pub fn close(&self) {
        self.fire(Direction::Outbound, Event::Close);
    }

    /// Signals the next inbound handler that data was staged.
    pub fn fire_inbound_updated(&self) {
        self.fire(Direction::Inbound, Event::InboundUpdated);
    }

    /// Passes `transport_active` on.
    pub fn fire_transport_active(&self) {
        self.fire(Direction::Inbound, Event::TransportActive);
    }

    /// Passes `transport_inactive` on.
    pub fn fire_transport_inactive(&self) {
        self.fire(Direction::Inbound, Event::TransportInactive);
    }

    /// Passes `read_eof` on.
    pub fn fire_read_eof(&self) {
        self.fire(Direction::Inbound, Event::ReadEof);
    }

    /// Passes `handle_timeout` on.
    pub fn fire_handle_timeout(&self, now: Instant) {
        self.fire(Direction::Inbound, Event::Timeout(now));
    }

    /// Passes `poll_timeout` on.
    pub fn fire_poll_timeout(&self, eto: &mut Instant) {
        self.fire(Direction::Inbound, Event::PollTimeout(eto));
    }

    /// Passes a user event on.
    pub fn fire_user_event(&self, event: Message) {
        self.fire(Direction::Inbound, Event::UserEvent(event));
    }

    /// Offers `fault` to the next handler in the direction of the current event. At the end
    /// of the chain it is reported as unhandled.
    pub fn fire_exception_caught(&self, fault: HandlerFault) {
        self.fire(self.direction, Event::ExceptionCaught(fault));
    }

    fn fire(&self, direction: Direction, event: Event<'_>) {
        let (chain, anchor) = self.resolve(direction);
        self.pipeline.dispatch(chain, anchor, direction, event);
    }

    /// Loads the published chain and finds where the next hop in `direction` starts.
    ///
    /// If the entry was unlinked while this event was running, propagation continues from
    /// the first entry of the event's snapshot that follows it and is still linked.
    fn resolve(&self, direction: Direction) -> (Arc<Chain>, Anchor) {
        let chain = self.pipeline.settled_chain();
        self.pipeline.resolve_in(chain, &self.entry, &self.snapshot, direction)
    }
}
