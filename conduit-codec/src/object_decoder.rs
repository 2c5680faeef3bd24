//! Decoder matching [`ObjectEncoder`](crate::ObjectEncoder).

use bytes::BytesMut;
use conduit::Message;

use crate::decoder::{ByteToMessageDecoder, DecoderHandler};
use crate::error::CodecError;
use crate::length_field::LengthFieldFrameDecoder;
use crate::serializer::ObjectSerializer;

/// Largest payload accepted by [`ObjectDecoder::new`], in bytes.
pub const DEFAULT_MAX_OBJECT_SIZE: usize = 1_048_576;

/// Reads `[u32 big-endian length][payload]` frames and deserializes each payload into the
/// serializer's item type.
pub struct ObjectDecoder<S> {
    frames: LengthFieldFrameDecoder,
    serializer: S,
}

impl<S: ObjectSerializer> ObjectDecoder<S> {
    /// Creates a decoder accepting payloads up to [`DEFAULT_MAX_OBJECT_SIZE`].
    pub fn new(serializer: S) -> Self {
        Self::with_max_object_size(serializer, DEFAULT_MAX_OBJECT_SIZE)
    }

    /// Creates a decoder accepting payloads up to `max_object_size` bytes.
    pub fn with_max_object_size(serializer: S, max_object_size: usize) -> Self {
        Self {
            frames: LengthFieldFrameDecoder::new(max_object_size),
            serializer,
        }
    }

    /// Largest payload this decoder accepts.
    pub fn max_object_size(&self) -> usize {
        self.frames.max_frame_length()
    }

    /// Wraps the decoder as a pipeline stage.
    pub fn into_handler(self) -> DecoderHandler<Self> {
        DecoderHandler::new(self)
    }

    fn item(&self, frame: Option<bytes::Bytes>) -> Result<Option<Message>, CodecError> {
        match frame {
            Some(payload) => {
                let item = self.serializer.deserialize(&payload)?;
                Ok(Some(Box::new(item)))
            }
            None => Ok(None),
        }
    }
}

impl<S: ObjectSerializer> ByteToMessageDecoder for ObjectDecoder<S> {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        let frame = self.frames.decode_frame(src)?;
        self.item(frame)
    }

    fn decode_last(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        let frame = self.frames.decode_last_frame(src)?;
        self.item(frame)
    }
}
