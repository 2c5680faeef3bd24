//! # Pipeline - Named Chain of Handlers
//!
//! A [`Pipeline`] is the ordered chain of named [`Handler`]s bound to one connection. The
//! I/O layer drives it from the head with `handle_read`, `handle_eof`, `transport_active`
//! and friends, and drains what handlers wrote with [`poll_write`](Pipeline::poll_write).
//! The application drives it from the tail with [`write`](Pipeline::write),
//! [`flush`](Pipeline::flush) and [`close`](Pipeline::close).
//!
//! ## Architecture
//!
//! ```text
//!                       Network I/O
//!                           ↓↑
//!   handle_read ──▶ ┌───────────────┐ ◀── poll_write
//!                   │  head (sink)  │
//!                   └───────────────┘
//!              inbound │       ▲ outbound
//!                      ▼       │
//!                   ┌───────────────┐
//!                   │ "frame" entry │  ByteStream → MessageQueue
//!                   └───────────────┘
//!                      │       ▲
//!                      ▼       │
//!                   ┌───────────────┐
//!                   │ "app" entry   │  MessageQueue → MessageQueue
//!                   └───────────────┘
//!                      │       ▲
//!                      ▼       │
//!                   ┌───────────────┐
//!   take_inbound_*◀─│  tail (sink)  │◀── write / flush / close
//!                   └───────────────┘
//!                       Application
//! ```
//!
//! The head and tail are implicit: they hold no user handler and never appear in
//! [`names`](Pipeline::names). Each of them carries a byte stream and a message queue that
//! collect whatever travels past the last handler.
//!
//! ## Live reconfiguration
//!
//! Handlers can be added, removed and replaced while events are flowing, from any thread.
//! The chain is an immutable snapshot behind an [`ArcSwap`]; a mutation copies it, edits the
//! copy and publishes it with a single store. Dispatch re-reads the published chain at each
//! hop, so an event sees the chain either before or after a mutation, never a half-linked
//! state, and an unlinked handler receives no further events.
//!
//! Removing a handler does not lose data: whatever is still staged in its holders is moved
//! to the next holder of the same kind in the same direction (or to the boundary sink), and
//! that receiver is signalled.
//!
//! ## Locking
//!
//! - The dispatch lock is re-entrant and held by every I/O and application entry point, so
//!   one propagation runs at a time per connection and handler code may call back into the
//!   pipeline.
//! - The mutation lock serializes copy-and-publish. Mutations take only this lock, so they
//!   never wait for a running handler, and a handler can observe its own unlinking through
//!   [`Context::is_linked`].
//! - Each buffer holder has its own lock, taken only to fill or drain it.
//!
//! What a mutation leaves to do afterwards (moving leftovers onward, `handler_added` and
//! `handler_removed`) is queued together with the publish. The thread holding the dispatch
//! lock runs the queue before it routes anything on the new chain; when no event is in
//! flight the mutating thread runs it itself before returning.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use conduit::{BufferSpec, Handler, Pipeline};
//!
//! struct Relay;
//! impl Handler for Relay {
//!     fn inbound(&self) -> Option<BufferSpec> {
//!         Some(BufferSpec::bytes())
//!     }
//!     fn is_sharable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let pipeline = Pipeline::new();
//! let relay: Arc<dyn Handler> = Arc::new(Relay);
//! pipeline
//!     .add_last("first", relay.clone())?
//!     .add_last("second", relay)?;
//! assert_eq!(pipeline.names(), ["first", "second"]);
//!
//! pipeline.handle_read(b"ping");
//! assert_eq!(&pipeline.take_inbound_bytes()[..], b"ping");
//! # Ok::<(), conduit::PipelineError>(())
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use dashmap::DashSet;
use log::{debug, trace, warn};
use parking_lot::{Mutex, ReentrantMutex};

use crate::buffer::{BufferHolder, BufferKind, ByteStream, Message, MessageQueue, into_bytes};
use crate::config::{FaultPolicy, PipelineConfig};
use crate::context::Context;
use crate::entry::{Chain, Entry, EntryId};
use crate::error::{HandlerFault, PipelineError};
use crate::handler::{Direction, Handler};

/// Callback invoked when outbound data reaches the head and is ready for
/// [`poll_write`](Pipeline::poll_write).
pub type NotifyCallback = Arc<dyn Fn() + Send + Sync>;

/// Non-sharable handler allocations currently bound to an entry, across all pipelines.
static BOUND: LazyLock<DashSet<usize>> = LazyLock::new(DashSet::new);

fn bind(entry: &Entry) -> Result<(), PipelineError> {
    if entry.exclusive && !BOUND.insert(entry.handler_key()) {
        return Err(PipelineError::NotShareable(entry.name.clone()));
    }
    Ok(())
}

fn unbind(entry: &Entry) {
    if entry.exclusive {
        BOUND.remove(&entry.handler_key());
    }
}

/// Events carried through the chain.
pub(crate) enum Event<'a> {
    TransportActive,
    TransportInactive,
    InboundUpdated,
    ReadEof,
    Timeout(Instant),
    PollTimeout(&'a mut Instant),
    UserEvent(Message),
    ExceptionCaught(HandlerFault),
    Flush,
    Close,
}

impl Event<'_> {
    fn label(&self) -> &'static str {
        match self {
            Event::TransportActive => "transport_active",
            Event::TransportInactive => "transport_inactive",
            Event::InboundUpdated => "inbound_updated",
            Event::ReadEof => "read_eof",
            Event::Timeout(_) => "handle_timeout",
            Event::PollTimeout(_) => "poll_timeout",
            Event::UserEvent(_) => "user_event",
            Event::ExceptionCaught(_) => "exception_caught",
            Event::Flush => "flush",
            Event::Close => "close",
        }
    }

    /// The event signalling that data was staged for the next handler.
    fn staged(direction: Direction) -> Self {
        match direction {
            Direction::Inbound => Event::InboundUpdated,
            Direction::Outbound => Event::Flush,
        }
    }
}

/// Work a mutation leaves for the thread holding the dispatch lock.
enum Deferred {
    Added(Arc<Entry>),
    /// Move what an unlinked entry still holds for `direction` onward.
    Migrate {
        entry: Arc<Entry>,
        snapshot: Arc<Chain>,
        direction: Direction,
    },
    /// Signal a replacement that it adopted staged data.
    Adopted {
        entry: Arc<Entry>,
        direction: Direction,
    },
    Removed {
        entry: Arc<Entry>,
        snapshot: Arc<Chain>,
    },
}

/// Where the next hop of a propagation starts in the current chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Anchor {
    /// Continue after this position (`None` is the boundary the direction enters from).
    At(Option<usize>),
    /// No handler is left in this direction; the next hop is the boundary sink.
    Exhausted,
}

/// Boundary buffer holding both kinds.
#[derive(Default)]
struct Sink {
    bytes: ByteStream,
    messages: MessageQueue,
}

impl Sink {
    fn offer(&self, msg: Message) {
        match into_bytes(msg) {
            Ok(data) => self.bytes.append(&data),
            Err(msg) => self.messages.push(msg),
        }
    }

    fn holder(&self, kind: BufferKind) -> BufferHolder {
        match kind {
            BufferKind::ByteStream => BufferHolder::Bytes(self.bytes.clone()),
            BufferKind::MessageQueue => BufferHolder::Messages(self.messages.clone()),
        }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.messages.is_empty()
    }
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}

/// A connection-scoped chain of named handlers.
///
/// All methods take `&self`; wrap the pipeline in an [`Arc`] to share it between the I/O
/// task and a control thread.
pub struct Pipeline {
    config: PipelineConfig,
    chain: ArcSwap<Chain>,
    mutation: Mutex<()>,
    dispatch: ReentrantMutex<()>,
    deferred: Mutex<VecDeque<Deferred>>,
    epoch: AtomicU64,
    sequence: AtomicU64,
    head: Sink,
    tail: Sink,
    write_notify: Mutex<Option<NotifyCallback>>,
    /// Set while a close request travels toward the head.
    closing: AtomicBool,
    closed: AtomicBool,
    unhandled: Mutex<Vec<HandlerFault>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Creates an empty pipeline.
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            chain: ArcSwap::from_pointee(Chain::default()),
            mutation: Mutex::new(()),
            dispatch: ReentrantMutex::new(()),
            deferred: Mutex::new(VecDeque::new()),
            epoch: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            head: Sink::default(),
            tail: Sink::default(),
            write_notify: Mutex::new(None),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            unhandled: Mutex::new(Vec::new()),
        }
    }

    /// The configuration this pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ---------------------------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------------------------

    /// Inserts `handler` under `name` at the head side of the chain.
    pub fn add_first(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self, PipelineError> {
        self.insert(name.into(), handler, Position::First)
    }

    /// Inserts `handler` under `name` at the tail side of the chain.
    pub fn add_last(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self, PipelineError> {
        self.insert(name.into(), handler, Position::Last)
    }

    /// Inserts `handler` under `name` immediately before `anchor`.
    pub fn add_before(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self, PipelineError> {
        self.insert(name.into(), handler, Position::Before(anchor))
    }

    /// Inserts `handler` under `name` immediately after `anchor`.
    pub fn add_after(
        &self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<&Self, PipelineError> {
        self.insert(name.into(), handler, Position::After(anchor))
    }

    fn insert(
        &self,
        name: String,
        handler: Arc<dyn Handler>,
        position: Position<'_>,
    ) -> Result<&Self, PipelineError> {
        {
            let _mutation = self.mutation.lock();
            let current = self.chain.load_full();
            if current.find(&name).is_some() {
                return Err(PipelineError::DuplicateName(name));
            }
            let index = match position {
                Position::First => 0,
                Position::Last => current.len(),
                Position::Before(anchor) => Self::locate(&current, anchor)?,
                Position::After(anchor) => Self::locate(&current, anchor)? + 1,
            };

            let entry = Arc::new(Entry::new(self.next_id(), name, handler));
            let mut entries = current.entries.clone();
            entries.insert(index, Arc::clone(&entry));
            let next = Chain::new(entries);
            self.check_kinds(&next, index)?;
            bind(&entry)?;
            self.commit(next, "added", &entry.name, [Deferred::Added(Arc::clone(&entry))]);
        }

        self.run_deferred();
        Ok(self)
    }

    /// Unlinks the handler registered under `name` and returns it.
    ///
    /// Fails with [`PipelineError::BufferKindMismatch`] if the handlers it separates would
    /// disagree on the buffer kind they exchange.
    ///
    /// This does not wait for the handler to finish an event it is processing on another
    /// thread; that event runs to completion and nothing further is delivered to it.
    /// Anything still staged in its holders is then moved onward and the receiver is
    /// signalled. Without an event in flight this happens before `remove` returns.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Handler>, PipelineError> {
        let removed = {
            let _mutation = self.mutation.lock();
            let current = self.chain.load_full();
            let index = Self::locate(&current, name)?;
            let mut entries = current.entries.clone();
            let removed = entries.remove(index);
            let next = Chain::new(entries);
            self.check_chain(&next)?;
            unbind(&removed);

            let leftovers = [Direction::Inbound, Direction::Outbound].map(|direction| {
                Deferred::Migrate {
                    entry: Arc::clone(&removed),
                    snapshot: Arc::clone(&current),
                    direction,
                }
            });
            let lifecycle = Deferred::Removed {
                entry: Arc::clone(&removed),
                snapshot: current,
            };
            self.commit(next, "removed", name, leftovers.into_iter().chain([lifecycle]));
            removed
        };

        self.run_deferred();
        Ok(Arc::clone(&removed.handler))
    }

    /// Unlinks the first handler and returns it.
    pub fn remove_first(&self) -> Result<Arc<dyn Handler>, PipelineError> {
        let name = self
            .first()
            .ok_or_else(|| PipelineError::NotFound("<first>".to_owned()))?;
        self.remove(&name)
    }

    /// Unlinks the last handler and returns it.
    pub fn remove_last(&self) -> Result<Arc<dyn Handler>, PipelineError> {
        let name = self
            .last()
            .ok_or_else(|| PipelineError::NotFound("<last>".to_owned()))?;
        self.remove(&name)
    }

    /// Puts `handler` under `new_name` in the exact position of `old_name` and returns the
    /// handler it replaced.
    ///
    /// `new_name` may equal `old_name`. Data staged for the old handler is handed to the new
    /// one when the holder kinds agree, and moved onward otherwise.
    pub fn replace(
        &self,
        old_name: &str,
        new_name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Arc<dyn Handler>, PipelineError> {
        let new_name = new_name.into();
        let old = {
            let _mutation = self.mutation.lock();
            let current = self.chain.load_full();
            let index = Self::locate(&current, old_name)?;
            if new_name != old_name && current.find(&new_name).is_some() {
                return Err(PipelineError::DuplicateName(new_name));
            }

            let old = Arc::clone(&current.entries[index]);
            let (entry, adopt_in, adopt_out) =
                Entry::replacing(self.next_id(), new_name, handler, &old);
            let new = Arc::new(entry);
            let mut entries = current.entries.clone();
            entries[index] = Arc::clone(&new);
            let next = Chain::new(entries);
            self.check_kinds(&next, index)?;
            self.check_chain(&next)?;
            if new.handler_key() != old.handler_key() {
                bind(&new)?;
                unbind(&old);
            }

            let mut tasks = vec![Deferred::Added(Arc::clone(&new))];
            for (direction, adopted) in [
                (Direction::Inbound, adopt_in),
                (Direction::Outbound, adopt_out),
            ] {
                tasks.push(if adopted {
                    Deferred::Adopted {
                        entry: Arc::clone(&new),
                        direction,
                    }
                } else {
                    Deferred::Migrate {
                        entry: Arc::clone(&old),
                        snapshot: Arc::clone(&current),
                        direction,
                    }
                });
            }
            tasks.push(Deferred::Removed {
                entry: Arc::clone(&old),
                snapshot: current,
            });
            self.commit(next, "replaced", &new.name, tasks);
            old
        };

        self.run_deferred();
        Ok(Arc::clone(&old.handler))
    }

    /// The handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let chain = self.chain.load();
        chain
            .find(name)
            .map(|i| Arc::clone(&chain.entries[i].handler))
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.chain.load().find(name).is_some()
    }

    /// Handler names, head side first.
    pub fn names(&self) -> Vec<String> {
        self.chain
            .load()
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Name of the handler closest to the head.
    pub fn first(&self) -> Option<String> {
        self.chain.load().entries.first().map(|e| e.name.clone())
    }

    /// Name of the handler closest to the tail.
    pub fn last(&self) -> Option<String> {
        self.chain.load().entries.last().map(|e| e.name.clone())
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.chain.load().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of structural mutations published so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn locate(chain: &Chain, name: &str) -> Result<usize, PipelineError> {
        chain
            .find(name)
            .ok_or_else(|| PipelineError::NotFound(name.to_owned()))
    }

    fn next_id(&self) -> EntryId {
        EntryId(self.sequence.fetch_add(1, Ordering::Relaxed))
    }

    /// Publishes `chain` and queues the work it leaves behind in one step: a thread that
    /// loads the chain through [`settled_chain`](Self::settled_chain) sees either neither
    /// or both.
    fn commit(
        &self,
        chain: Chain,
        action: &str,
        name: &str,
        tasks: impl IntoIterator<Item = Deferred>,
    ) {
        let mut queue = self.deferred.lock();
        let chain = Arc::new(chain);
        self.chain.store(Arc::clone(&chain));
        queue.extend(tasks);
        drop(queue);

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(
            "{}: {} \"{}\" (epoch {}, {} handlers)",
            self.config.name,
            action,
            name,
            epoch,
            chain.len()
        );
    }

    /// Runs the queued work unless another thread is dispatching, in which case that
    /// thread runs it.
    fn run_deferred(&self) {
        while self.has_deferred() {
            let Some(_dispatch) = self.dispatch.try_lock() else {
                return;
            };
            self.settled_chain();
        }
    }

    fn has_deferred(&self) -> bool {
        !self.deferred.lock().is_empty()
    }

    /// Runs the queued work in order, then loads the published chain. The caller holds the
    /// dispatch lock.
    pub(crate) fn settled_chain(&self) -> Arc<Chain> {
        loop {
            let task = {
                let mut queue = self.deferred.lock();
                match queue.pop_front() {
                    Some(task) => task,
                    None => return self.chain.load_full(),
                }
            };
            self.run(task);
        }
    }

    fn run(&self, task: Deferred) {
        match task {
            Deferred::Added(entry) => self.lifecycle_added(&entry, self.current()),
            Deferred::Migrate {
                entry,
                snapshot,
                direction,
            } => self.migrate(&entry, &snapshot, direction),
            Deferred::Adopted { entry, direction } => {
                let chain = self.current();
                let staged = entry.holder(direction).is_some_and(|h| !h.is_empty());
                if staged && chain.contains_id(entry.id) {
                    self.invoke(&entry, chain, direction, Event::staged(direction));
                }
            }
            Deferred::Removed { entry, snapshot } => self.lifecycle_removed(&entry, snapshot),
        }
    }

    /// Checks every entry of `chain` against its neighbours.
    fn check_chain(&self, chain: &Chain) -> Result<(), PipelineError> {
        (0..chain.len()).try_for_each(|index| self.check_kinds(chain, index))
    }

    /// Checks that the entry at `index` agrees on buffer kinds with its neighbours in both
    /// directions.
    fn check_kinds(&self, chain: &Chain, index: usize) -> Result<(), PipelineError> {
        let entry = &chain.entries[index];
        let transport = self.config.transport;
        for direction in [Direction::Inbound, Direction::Outbound] {
            let Some(spec) = entry.spec(direction) else {
                continue;
            };
            let mismatch = |expected, found| PipelineError::BufferKindMismatch {
                name: entry.name.clone(),
                direction,
                expected,
                found,
            };

            // The head feeds inbound traffic in the transport's kind; the tail feeds
            // outbound traffic in whatever kind the application writes.
            let produced = chain
                .before(index, direction)
                .find_map(|e| e.spec(direction))
                .map(|s| s.output)
                .or(match direction {
                    Direction::Inbound => Some(transport),
                    Direction::Outbound => None,
                });
            if let Some(found) = produced {
                if found != spec.input {
                    return Err(mismatch(spec.input, found));
                }
            }

            let consumed = chain
                .after(Some(index), direction)
                .find_map(|e| e.spec(direction))
                .map(|s| s.input)
                .or(match direction {
                    Direction::Inbound => None,
                    Direction::Outbound => Some(transport),
                });
            if let Some(expected) = consumed {
                if expected != spec.output {
                    return Err(mismatch(expected, spec.output));
                }
            }
        }
        Ok(())
    }

    /// Moves whatever the unlinked `old` still holds for `direction` to the next holder of
    /// the same kind, then signals the receiver.
    fn migrate(&self, old: &Entry, snapshot: &Chain, direction: Direction) {
        let Some(holder) = old.holder(direction) else {
            return;
        };
        if holder.is_empty() {
            return;
        }

        let (chain, anchor) = self.resolve_in(self.current(), old, snapshot, direction);
        let receiver = match anchor {
            Anchor::At(index) => chain
                .next_holder(index, direction, holder.kind())
                .map(|(entry, to)| (Arc::clone(entry), to.clone())),
            Anchor::Exhausted => None,
        };
        let moved = match &receiver {
            Some((_, to)) => holder.transfer_to(to),
            None => holder.transfer_to(&self.sink(direction).holder(holder.kind())),
        };
        if moved == 0 {
            return;
        }
        trace!(
            "{}: moved {} staged {} unit(s) from \"{}\" to {}",
            self.config.name,
            moved,
            direction,
            old.name,
            receiver
                .as_ref()
                .map_or("the boundary", |(entry, _)| entry.name.as_str())
        );

        match receiver {
            Some((entry, _)) => self.invoke(&entry, chain, direction, Event::staged(direction)),
            None => self.boundary(direction, Event::staged(direction)),
        }
    }

    fn lifecycle_added(&self, entry: &Arc<Entry>, chain: Arc<Chain>) {
        let ctx = Context::new(self, Arc::clone(entry), chain, Direction::Inbound);
        entry.handler.handler_added(&ctx);
    }

    fn lifecycle_removed(&self, entry: &Arc<Entry>, chain: Arc<Chain>) {
        let ctx = Context::new(self, Arc::clone(entry), chain, Direction::Inbound);
        entry.handler.handler_removed(&ctx);
    }

    // ---------------------------------------------------------------------------------
    // I/O entry points
    // ---------------------------------------------------------------------------------

    /// Signals that the transport became active.
    pub fn transport_active(&self) {
        self.fire_from_end(Direction::Inbound, Event::TransportActive);
    }

    /// Signals that the transport became inactive.
    pub fn transport_inactive(&self) {
        self.fire_from_end(Direction::Inbound, Event::TransportInactive);
    }

    /// Feeds bytes read from the transport.
    pub fn handle_read(&self, data: impl AsRef<[u8]>) {
        self.handle_read_message(Box::new(Bytes::copy_from_slice(data.as_ref())));
    }

    /// Feeds a value read from a message-oriented transport.
    ///
    /// Byte-like values (`Bytes`, `BytesMut`, `Vec<u8>`) may land in a byte stream; anything
    /// else goes to the nearest message queue.
    pub fn handle_read_message(&self, msg: Message) {
        {
            let _dispatch = self.dispatch.lock();
            let chain = self.settled_chain();
            self.place(&chain, Anchor::At(None), Direction::Inbound, msg);
            self.dispatch(chain, Anchor::At(None), Direction::Inbound, Event::InboundUpdated);
        }
        self.run_deferred();
    }

    /// Signals that the peer finished sending.
    pub fn handle_eof(&self) {
        self.fire_from_end(Direction::Inbound, Event::ReadEof);
    }

    /// Drives timers whose deadline is at or before `now`.
    pub fn handle_timeout(&self, now: Instant) {
        self.fire_from_end(Direction::Inbound, Event::Timeout(now));
    }

    /// Lowers `eto` to the earliest deadline any handler asks for.
    pub fn poll_timeout(&self, eto: &mut Instant) {
        self.fire_from_end(Direction::Inbound, Event::PollTimeout(eto));
    }

    /// Takes every byte that reached the head, ready to be written to the transport.
    pub fn poll_write(&self) -> Option<Bytes> {
        if self.head.bytes.is_empty() {
            None
        } else {
            Some(self.head.bytes.take())
        }
    }

    /// Takes the oldest value that reached the head.
    pub fn poll_write_message(&self) -> Option<Message> {
        self.head.messages.pop()
    }

    /// Registers the callback run when data reaches the head or the pipeline closes.
    pub fn set_write_notify(&self, notify: NotifyCallback) {
        *self.write_notify.lock() = Some(notify);
    }

    /// Whether a close request reached the head.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------------------
    // Application entry points
    // ---------------------------------------------------------------------------------

    /// Stages `msg` for the handler nearest the tail that can hold it.
    ///
    /// Call [`flush`](Pipeline::flush) to let the handlers process it.
    pub fn write(&self, msg: Message) {
        {
            let _dispatch = self.dispatch.lock();
            let chain = self.settled_chain();
            self.place(&chain, Anchor::At(None), Direction::Outbound, msg);
        }
        self.run_deferred();
    }

    /// Signals the outbound handlers that data was staged.
    pub fn flush(&self) {
        self.fire_from_end(Direction::Outbound, Event::Flush);
    }

    /// [`write`](Pipeline::write) followed by [`flush`](Pipeline::flush).
    pub fn write_and_flush(&self, msg: Message) {
        let _dispatch = self.dispatch.lock();
        self.write(msg);
        self.flush();
    }

    /// Sends a close request toward the transport.
    ///
    /// Ignored once a close has reached the head, and while another close is still
    /// travelling. A handler may hold a close back; a later call sends a new request.
    pub fn close(&self) {
        {
            let _dispatch = self.dispatch.lock();
            if self.is_closed() || self.closing.swap(true, Ordering::AcqRel) {
                return;
            }
            let chain = self.settled_chain();
            self.dispatch(chain, Anchor::At(None), Direction::Outbound, Event::Close);
            self.closing.store(false, Ordering::Release);
        }
        self.run_deferred();
    }

    /// Sends an application-defined event through the inbound handlers.
    pub fn fire_user_event(&self, event: Message) {
        self.fire_from_end(Direction::Inbound, Event::UserEvent(event));
    }

    /// Takes every value that travelled past the last inbound handler.
    pub fn take_inbound_messages(&self) -> Vec<Message> {
        self.tail.messages.drain()
    }

    /// Takes every byte that travelled past the last inbound handler.
    pub fn take_inbound_bytes(&self) -> Bytes {
        self.tail.bytes.take()
    }

    /// Takes the faults no handler consumed, oldest first.
    pub fn take_unhandled_faults(&self) -> Vec<HandlerFault> {
        std::mem::take(&mut *self.unhandled.lock())
    }

    // ---------------------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------------------

    pub(crate) fn current(&self) -> Arc<Chain> {
        self.chain.load_full()
    }

    fn fire_from_end(&self, direction: Direction, event: Event<'_>) {
        {
            let _dispatch = self.dispatch.lock();
            let chain = self.settled_chain();
            self.dispatch(chain, Anchor::At(None), direction, event);
        }
        self.run_deferred();
    }

    /// Delivers `event` to the next handler after `anchor`, or to the boundary.
    ///
    /// A handler unlinked since `chain` was loaded is skipped.
    pub(crate) fn dispatch(
        &self,
        chain: Arc<Chain>,
        anchor: Anchor,
        direction: Direction,
        event: Event<'_>,
    ) {
        let (mut chain, mut anchor) = (chain, anchor);
        loop {
            let next = match anchor {
                Anchor::At(index) => chain.next_handling(index, direction).cloned(),
                Anchor::Exhausted => None,
            };
            let Some(entry) = next else {
                return self.boundary(direction, event);
            };
            let current = self.current();
            if current.contains_id(entry.id) {
                return self.invoke(&entry, chain, direction, event);
            }
            (chain, anchor) = self.resolve_in(current, &entry, &chain, direction);
        }
    }

    /// Finds where the next hop after `entry` starts in `chain`.
    ///
    /// If `entry` is no longer linked, propagation continues from the first entry of
    /// `snapshot` that follows it and is still linked.
    pub(crate) fn resolve_in(
        &self,
        chain: Arc<Chain>,
        entry: &Entry,
        snapshot: &Chain,
        direction: Direction,
    ) -> (Arc<Chain>, Anchor) {
        if let Some(pos) = chain.position(entry.id) {
            return (chain, Anchor::At(Some(pos)));
        }

        let Some(own) = snapshot.position(entry.id) else {
            return (chain, Anchor::Exhausted);
        };
        let resumed = snapshot
            .after(Some(own), direction)
            .find_map(|e| chain.position(e.id));
        let anchor = match (resumed, direction) {
            (Some(pos), Direction::Inbound) => Anchor::At(pos.checked_sub(1)),
            (Some(pos), Direction::Outbound) => Anchor::At(Some(pos + 1)),
            (None, _) => Anchor::Exhausted,
        };
        (chain, anchor)
    }

    fn invoke(
        &self,
        entry: &Arc<Entry>,
        chain: Arc<Chain>,
        direction: Direction,
        event: Event<'_>,
    ) {
        trace!(
            "{}: {} {} -> \"{}\"",
            self.config.name,
            direction,
            event.label(),
            entry.name
        );
        let ctx = Context::new(self, Arc::clone(entry), chain, direction);
        let handler = &entry.handler;
        let result = match event {
            Event::TransportActive => handler.transport_active(&ctx),
            Event::TransportInactive => handler.transport_inactive(&ctx),
            Event::InboundUpdated => handler.inbound_updated(&ctx),
            Event::ReadEof => handler.read_eof(&ctx),
            Event::Timeout(now) => handler.handle_timeout(&ctx, now),
            Event::PollTimeout(eto) => {
                handler.poll_timeout(&ctx, eto);
                Ok(())
            }
            Event::UserEvent(msg) => handler.user_event(&ctx, msg),
            Event::ExceptionCaught(fault) => handler.exception_caught(&ctx, fault),
            Event::Flush => handler.flush(&ctx),
            Event::Close => handler.close(&ctx),
        };
        if let Err(fault) = result {
            let fault = fault.with_origin(&entry.name);
            trace!("{}: \"{}\" raised {}", self.config.name, entry.name, fault);
            ctx.fire_exception_caught(fault);
        }
    }

    fn boundary(&self, direction: Direction, event: Event<'_>) {
        match (direction, event) {
            (_, Event::ExceptionCaught(fault)) => self.unhandled(direction, fault),
            (Direction::Inbound, Event::InboundUpdated) => debug!(
                "{}: tail holds {} byte(s) and {} message(s)",
                self.config.name,
                self.tail.bytes.len(),
                self.tail.messages.len()
            ),
            (Direction::Inbound, Event::UserEvent(_)) => {
                debug!("{}: user event reached the tail, discarded", self.config.name)
            }
            (Direction::Outbound, Event::Flush) => {
                if !self.head.is_empty() {
                    self.notify_write();
                }
            }
            (Direction::Outbound, Event::Close) => {
                self.closed.store(true, Ordering::Release);
                debug!("{}: close reached the head", self.config.name);
                self.notify_write();
            }
            (_, event) => trace!(
                "{}: {} {} reached end of pipeline",
                self.config.name,
                direction,
                event.label()
            ),
        }
    }

    fn unhandled(&self, direction: Direction, fault: HandlerFault) {
        let end = match direction {
            Direction::Inbound => "tail",
            Direction::Outbound => "head",
        };
        warn!(
            "{}: unhandled fault reached the {}: {}",
            self.config.name, end, fault
        );
        self.unhandled.lock().push(fault);
        if self.config.fault_policy == FaultPolicy::Close {
            self.close();
        }
    }

    fn notify_write(&self) {
        let notify = self.write_notify.lock().clone();
        if let Some(notify) = notify {
            notify();
        }
    }

    fn sink(&self, direction: Direction) -> &Sink {
        match direction {
            Direction::Inbound => &self.tail,
            Direction::Outbound => &self.head,
        }
    }

    /// Offers `msg` to each holder after `anchor` in turn; the boundary sink takes it if
    /// none accepts.
    pub(crate) fn place(&self, chain: &Chain, anchor: Anchor, direction: Direction, msg: Message) {
        let mut msg = msg;
        if let Anchor::At(index) = anchor {
            for entry in chain.after(index, direction) {
                if let Some(holder) = entry.holder(direction) {
                    match holder.offer(msg) {
                        Ok(()) => return,
                        Err(rejected) => msg = rejected,
                    }
                }
            }
        }
        self.sink(direction).offer(msg);
    }

    pub(crate) fn next_holder(
        &self,
        chain: &Chain,
        anchor: Anchor,
        direction: Direction,
        kind: BufferKind,
    ) -> BufferHolder {
        if let Anchor::At(index) = anchor {
            if let Some((_, holder)) = chain.next_holder(index, direction, kind) {
                return holder.clone();
            }
        }
        self.sink(direction).holder(kind)
    }

    pub(crate) fn next_bytes(
        &self,
        chain: &Chain,
        anchor: Anchor,
        direction: Direction,
    ) -> ByteStream {
        match self.next_holder(chain, anchor, direction, BufferKind::ByteStream) {
            BufferHolder::Bytes(bytes) => bytes,
            BufferHolder::Messages(_) => self.sink(direction).bytes.clone(),
        }
    }

    pub(crate) fn next_messages(
        &self,
        chain: &Chain,
        anchor: Anchor,
        direction: Direction,
    ) -> MessageQueue {
        match self.next_holder(chain, anchor, direction, BufferKind::MessageQueue) {
            BufferHolder::Messages(queue) => queue,
            BufferHolder::Bytes(_) => self.sink(direction).messages.clone(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for entry in self.chain.load().entries.iter() {
            unbind(entry);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("handlers", &self.names())
            .field("epoch", &self.epoch())
            .field("closed", &self.is_closed())
            .finish()
    }
}
