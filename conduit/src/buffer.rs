//! # Buffer holders
//!
//! Every pipeline entry owns up to two buffer holders, one per direction. A holder is the
//! staging area a handler's predecessor writes into and the handler itself drains. Two kinds
//! exist:
//!
//! - [`ByteStream`]: an appendable run of octets, used by framing and compression stages.
//! - [`MessageQueue`]: an ordered queue of already-decoded values ([`Message`]).
//!
//! Holders are cheap handles (`Arc` inside) so a [`Context`](crate::Context) can hand one
//! out without borrowing the entry. Each holder is guarded by its own lock; the dispatch
//! path and the mutation path never need more than that lock to fill or drain it.
//!
//! ```rust
//! use conduit::{BufferHolder, BufferKind};
//!
//! let holder = BufferHolder::new(BufferKind::ByteStream);
//! let bytes = holder.as_bytes().unwrap();
//! bytes.append(b"hello");
//! assert_eq!(bytes.len(), 5);
//! assert_eq!(&bytes.drain(2)[..], b"he");
//! assert_eq!(&bytes.peek(3)[..], b"llo");
//! ```

use std::{any::Any, collections::VecDeque, fmt, sync::Arc};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// An opaque decoded value travelling through a [`MessageQueue`].
pub type Message = Box<dyn Any + Send>;

/// The two payload shapes a holder can stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    /// Raw octets.
    ByteStream,
    /// Discrete decoded values.
    MessageQueue,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferKind::ByteStream => f.write_str("byte stream"),
            BufferKind::MessageQueue => f.write_str("message queue"),
        }
    }
}

/// A growable byte staging buffer shared between two adjacent stages.
#[derive(Clone, Default)]
pub struct ByteStream {
    inner: Arc<Mutex<BytesMut>>,
}

impl ByteStream {
    /// Creates an empty byte stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the stream for direct access to the underlying [`BytesMut`].
    ///
    /// Encoders use this to write in place, e.g. reserving a length prefix and
    /// back-filling it once the payload size is known.
    pub fn lock(&self) -> MutexGuard<'_, BytesMut> {
        self.inner.lock()
    }

    /// Appends `data` at the end of the stream.
    pub fn append(&self, data: &[u8]) {
        self.inner.lock().extend_from_slice(data);
    }

    /// Returns a copy of up to `n` leading bytes without consuming them.
    pub fn peek(&self, n: usize) -> Bytes {
        let buf = self.inner.lock();
        let n = n.min(buf.len());
        Bytes::copy_from_slice(&buf[..n])
    }

    /// Removes and returns up to `n` leading bytes.
    pub fn drain(&self, n: usize) -> Bytes {
        let mut buf = self.inner.lock();
        let n = n.min(buf.len());
        buf.split_to(n).freeze()
    }

    /// Removes and returns everything currently staged.
    pub fn take(&self) -> Bytes {
        self.inner.lock().split().freeze()
    }

    /// Number of staged bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the stream holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Moves all staged bytes to the end of `other`.
    pub fn transfer_to(&self, other: &ByteStream) -> usize {
        if self.same_as(other) {
            return 0;
        }
        let data = self.take();
        let n = data.len();
        if n > 0 {
            other.inner.lock().extend_from_slice(&data);
        }
        n
    }

    fn same_as(&self, other: &ByteStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").field("len", &self.len()).finish()
    }
}

/// An ordered queue of decoded values shared between two adjacent stages.
#[derive(Clone, Default)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<Message>>>,
}

impl MessageQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value at the back of the queue.
    pub fn push(&self, msg: Message) {
        self.inner.lock().push_back(msg);
    }

    /// Pops the oldest value.
    pub fn pop(&self) -> Option<Message> {
        self.inner.lock().pop_front()
    }

    /// Removes and returns every queued value in order.
    pub fn drain(&self) -> Vec<Message> {
        self.inner.lock().drain(..).collect()
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Moves all queued values, in order, to the back of `other`.
    pub fn transfer_to(&self, other: &MessageQueue) -> usize {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return 0;
        }
        let items = self.drain();
        let n = items.len();
        if n > 0 {
            other.inner.lock().extend(items);
        }
        n
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// A typed slot holding either a [`ByteStream`] or a [`MessageQueue`].
///
/// The kind is chosen when the owning entry is created and never changes.
#[derive(Clone, Debug)]
pub enum BufferHolder {
    /// Byte-stream holder.
    Bytes(ByteStream),
    /// Message-queue holder.
    Messages(MessageQueue),
}

impl BufferHolder {
    /// Allocates an empty holder of the given kind.
    pub fn new(kind: BufferKind) -> Self {
        match kind {
            BufferKind::ByteStream => BufferHolder::Bytes(ByteStream::new()),
            BufferKind::MessageQueue => BufferHolder::Messages(MessageQueue::new()),
        }
    }

    /// The holder's kind.
    pub fn kind(&self) -> BufferKind {
        match self {
            BufferHolder::Bytes(_) => BufferKind::ByteStream,
            BufferHolder::Messages(_) => BufferKind::MessageQueue,
        }
    }

    /// The byte stream, if this is a byte-stream holder.
    pub fn as_bytes(&self) -> Option<&ByteStream> {
        match self {
            BufferHolder::Bytes(bytes) => Some(bytes),
            BufferHolder::Messages(_) => None,
        }
    }

    /// The message queue, if this is a message-queue holder.
    pub fn as_messages(&self) -> Option<&MessageQueue> {
        match self {
            BufferHolder::Messages(queue) => Some(queue),
            BufferHolder::Bytes(_) => None,
        }
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        match self {
            BufferHolder::Bytes(bytes) => bytes.is_empty(),
            BufferHolder::Messages(queue) => queue.is_empty(),
        }
    }

    /// Moves everything staged here to `other` when both hold the same kind.
    ///
    /// Returns the number of bytes or messages moved; holders of different kinds are left
    /// untouched.
    pub fn transfer_to(&self, other: &BufferHolder) -> usize {
        match (self, other) {
            (BufferHolder::Bytes(from), BufferHolder::Bytes(to)) => from.transfer_to(to),
            (BufferHolder::Messages(from), BufferHolder::Messages(to)) => from.transfer_to(to),
            _ => 0,
        }
    }

    /// Stores `msg` in this holder.
    ///
    /// A message queue accepts anything. A byte stream accepts byte-like values
    /// (`Bytes`, `BytesMut`, `Vec<u8>`); any other value is handed back.
    pub fn offer(&self, msg: Message) -> Result<(), Message> {
        match self {
            BufferHolder::Messages(queue) => {
                queue.push(msg);
                Ok(())
            }
            BufferHolder::Bytes(bytes) => {
                let data = into_bytes(msg)?;
                bytes.append(&data);
                Ok(())
            }
        }
    }
}

/// Converts a byte-like message into [`Bytes`], returning the message untouched otherwise.
pub fn into_bytes(msg: Message) -> Result<Bytes, Message> {
    let msg = match msg.downcast::<Bytes>() {
        Ok(b) => return Ok(*b),
        Err(msg) => msg,
    };
    let msg = match msg.downcast::<BytesMut>() {
        Ok(b) => return Ok(b.freeze()),
        Err(msg) => msg,
    };
    match msg.downcast::<Vec<u8>>() {
        Ok(v) => Ok(Bytes::from(*v)),
        Err(msg) => Err(msg),
    }
}
