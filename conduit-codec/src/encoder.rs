//! Outbound encoding: messages in, bytes out.

use std::any::Any;

use bytes::BytesMut;
use conduit::{BufferSpec, Context, Handler, HandlerFault, Message};
use log::trace;

use crate::error::CodecError;

/// Turns outbound messages into bytes.
///
/// Implementations write into the byte stream of the next outbound stage, after whatever is
/// already staged there.
pub trait MessageToByteEncoder: Send + Sync + 'static {
    /// Whether `msg` is something this encoder handles. Values it does not handle pass
    /// through to the next outbound stage unmodified.
    fn is_encodable(&self, msg: &(dyn Any + Send)) -> bool;

    /// Appends the encoded form of `msg` to `out`.
    fn encode(&self, msg: Message, out: &mut BytesMut) -> Result<(), CodecError>;

    /// Whether one encoder instance may serve several entries. Stateless encoders keep the
    /// default.
    fn is_sharable(&self) -> bool {
        true
    }
}

/// Pipeline stage driving a [`MessageToByteEncoder`].
///
/// Declares an outbound `MessageQueue -> ByteStream` buffer spec. On every flush it drains
/// its queue in order, encoding what it can and passing the rest on, then flushes onward.
pub struct EncoderHandler<E> {
    encoder: E,
}

impl<E: MessageToByteEncoder> EncoderHandler<E> {
    /// Wraps `encoder` as a pipeline stage.
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }

    /// The wrapped encoder.
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    fn encode_queued(&self, ctx: &Context<'_>) -> Result<usize, CodecError> {
        let Some(queue) = ctx.outbound_messages() else {
            return Ok(0);
        };
        let out = ctx.next_outbound_bytes();
        let mut encoded = 0;
        while let Some(msg) = queue.pop() {
            if !self.encoder.is_encodable(&*msg) {
                ctx.write(msg);
                continue;
            }
            self.encoder.encode(msg, &mut out.lock())?;
            encoded += 1;
        }
        Ok(encoded)
    }
}

impl<E: MessageToByteEncoder> Handler for EncoderHandler<E> {
    fn outbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::encoder())
    }

    fn is_sharable(&self) -> bool {
        self.encoder.is_sharable()
    }

    fn flush(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        let result = self.encode_queued(ctx);
        if let Ok(n) = result {
            trace!("{} encoded {} message(s)", ctx.name(), n);
        }
        ctx.flush();
        result.map(|_| ()).map_err(HandlerFault::from)
    }
}
