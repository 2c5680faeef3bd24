//! Length-prefixed object encoder.

use std::any::{Any, type_name};

use bytes::{BufMut, BytesMut};
use conduit::Message;

use crate::encoder::{EncoderHandler, MessageToByteEncoder};
use crate::error::CodecError;
use crate::length_field::LENGTH_FIELD_LENGTH;
use crate::serializer::ObjectSerializer;

const LENGTH_PLACEHOLDER: [u8; LENGTH_FIELD_LENGTH] = [0; LENGTH_FIELD_LENGTH];

/// Encodes values of the serializer's item type as
/// `[u32 big-endian payload length][payload]`.
///
/// The length is not known before serializing, so the encoder reserves a four-byte
/// placeholder at the current end of the output, serializes straight after it, and then
/// overwrites the placeholder with the number of bytes written. A payload too large for the
/// 32-bit prefix is removed again and reported as [`CodecError::FrameTooLarge`].
///
/// Values of any other type are not encodable and pass through untouched.
///
/// The output is only readable by an [`ObjectDecoder`](crate::ObjectDecoder) using the same
/// serializer.
///
/// ```rust
/// use bytes::BytesMut;
/// use conduit_codec::{JsonSerializer, MessageToByteEncoder, ObjectEncoder};
///
/// let encoder = ObjectEncoder::new(JsonSerializer::<u32>::new());
/// let mut out = BytesMut::new();
/// encoder.encode(Box::new(42u32), &mut out)?;
/// assert_eq!(&out[..], b"\x00\x00\x00\x0242");
/// assert!(!encoder.is_encodable(&"not a u32"));
/// # Ok::<(), conduit_codec::CodecError>(())
/// ```
pub struct ObjectEncoder<S> {
    serializer: S,
}

impl<S: ObjectSerializer> ObjectEncoder<S> {
    /// Creates an encoder writing payloads with `serializer`.
    pub fn new(serializer: S) -> Self {
        Self { serializer }
    }

    /// Wraps the encoder as a pipeline stage.
    pub fn into_handler(self) -> EncoderHandler<Self> {
        EncoderHandler::new(self)
    }

    /// Appends one frame holding `item` to `out`.
    pub fn encode_item(&self, item: &S::Item, out: &mut BytesMut) -> Result<(), CodecError> {
        let start = out.len();
        out.put_slice(&LENGTH_PLACEHOLDER);

        if let Err(err) = self.serializer.serialize(item, out) {
            out.truncate(start);
            return Err(err);
        }

        let written = out.len() - start - LENGTH_FIELD_LENGTH;
        let Ok(length) = u32::try_from(written) else {
            out.truncate(start);
            return Err(CodecError::FrameTooLarge(written));
        };
        out[start..start + LENGTH_FIELD_LENGTH].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }
}

impl<S: ObjectSerializer> MessageToByteEncoder for ObjectEncoder<S> {
    fn is_encodable(&self, msg: &(dyn Any + Send)) -> bool {
        msg.is::<S::Item>()
    }

    fn encode(&self, msg: Message, out: &mut BytesMut) -> Result<(), CodecError> {
        let item = msg
            .downcast::<S::Item>()
            .map_err(|_| CodecError::UnexpectedType(type_name::<S::Item>()))?;
        self.encode_item(&item, out)
    }
}
