//! Inbound decoding: bytes in, messages out.

use bytes::BytesMut;
use conduit::{BufferSpec, ByteStream, Context, Handler, HandlerFault, Message};
use log::trace;
use parking_lot::Mutex;

use crate::error::CodecError;

/// Cuts decoded messages out of an inbound byte stream.
///
/// When bytes arrive, `src` holds either less than a full message, exactly one, or more
/// than one:
///
/// 1. less than a full message: return `Ok(None)` and leave `src` alone;
/// 2. a full message: remove its bytes from `src` (for example with
///    [`BytesMut::split_to`]) and return `Ok(Some(msg))`.
///
/// The driving stage calls `decode` again until it returns `None`.
pub trait ByteToMessageDecoder: Send + 'static {
    /// Decodes at most one message from the front of `src`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError>;

    /// Called instead of `decode` once the peer finished sending.
    ///
    /// Anything left in `src` afterwards is dropped.
    fn decode_last(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        self.decode(src)
    }
}

/// Pipeline stage driving a [`ByteToMessageDecoder`].
///
/// Declares an inbound `ByteStream -> MessageQueue` buffer spec. Decoders keep partial-frame
/// state, so the stage is never sharable.
pub struct DecoderHandler<D> {
    decoder: Mutex<D>,
}

impl<D: ByteToMessageDecoder> DecoderHandler<D> {
    /// Wraps `decoder` as a pipeline stage.
    pub fn new(decoder: D) -> Self {
        Self {
            decoder: Mutex::new(decoder),
        }
    }

    /// Decodes as many messages as the staged bytes allow. Messages decoded before an
    /// error are still delivered.
    fn decode_staged(
        &self,
        ctx: &Context<'_>,
        input: &ByteStream,
        last: bool,
    ) -> (usize, Result<(), CodecError>) {
        let mut decoder = self.decoder.lock();
        let out = ctx.next_inbound_messages();
        let mut src = input.lock();
        let mut decoded = 0;
        let mut result = Ok(());
        while !src.is_empty() {
            let before = src.len();
            let step = if last {
                decoder.decode_last(&mut src)
            } else {
                decoder.decode(&mut src)
            };
            match step {
                Ok(Some(msg)) => {
                    out.push(msg);
                    decoded += 1;
                    if src.len() == before {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if last {
            src.clear();
        }
        (decoded, result)
    }

    fn run(&self, ctx: &Context<'_>, last: bool) -> Result<(), HandlerFault> {
        let Some(input) = ctx.inbound_bytes() else {
            return Ok(());
        };
        let (decoded, result) = self.decode_staged(ctx, input, last);
        if decoded > 0 {
            trace!("{} decoded {} message(s)", ctx.name(), decoded);
            ctx.fire_inbound_updated();
        }
        result.map_err(HandlerFault::from)
    }
}

impl<D: ByteToMessageDecoder> Handler for DecoderHandler<D> {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::decoder())
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        self.run(ctx, false)
    }

    fn read_eof(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        let result = self.run(ctx, true);
        ctx.fire_read_eof();
        result
    }
}
