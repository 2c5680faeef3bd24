//! Splits a `[u32 big-endian length][payload]` stream into frames.

use bytes::{Buf, Bytes, BytesMut};
use log::warn;

use crate::decoder::ByteToMessageDecoder;
use crate::error::CodecError;
use conduit::Message;

/// Size of the length prefix in bytes.
pub const LENGTH_FIELD_LENGTH: usize = 4;

/// Decoder for length-prefixed frames.
///
/// Emits each payload as [`Bytes`], without its prefix. A prefix announcing more than
/// `max_frame_length` bytes fails with [`CodecError::FrameTooLong`]; the payload of that
/// frame is skipped, including bytes that only arrive later, and decoding carries on with
/// the next frame.
///
/// ```rust
/// use bytes::BytesMut;
/// use conduit_codec::LengthFieldFrameDecoder;
///
/// let mut decoder = LengthFieldFrameDecoder::new(1024);
/// let mut src = BytesMut::from(&b"\x00\x00\x00\x03abc\x00\x00"[..]);
/// let frame = decoder.decode_frame(&mut src)?.unwrap();
/// assert_eq!(&frame[..], b"abc");
/// assert!(decoder.decode_frame(&mut src)?.is_none());
/// assert_eq!(src.len(), 2);
/// # Ok::<(), conduit_codec::CodecError>(())
/// ```
#[derive(Debug)]
pub struct LengthFieldFrameDecoder {
    max_frame_length: usize,
    discarding: usize,
}

impl LengthFieldFrameDecoder {
    /// Creates a decoder rejecting payloads longer than `max_frame_length`.
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            discarding: 0,
        }
    }

    /// The configured maximum payload length.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Removes one complete frame from the front of `src` and returns its payload.
    pub fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        if self.discarding > 0 {
            let skip = self.discarding.min(src.len());
            src.advance(skip);
            self.discarding -= skip;
            if self.discarding > 0 {
                return Ok(None);
            }
        }

        if src.len() < LENGTH_FIELD_LENGTH {
            return Ok(None);
        }
        let length = (&src[..LENGTH_FIELD_LENGTH]).get_u32() as usize;

        if length > self.max_frame_length {
            src.advance(LENGTH_FIELD_LENGTH);
            let skip = length.min(src.len());
            src.advance(skip);
            self.discarding = length - skip;
            warn!(
                "discarding frame of {} bytes (max {})",
                length, self.max_frame_length
            );
            return Err(CodecError::FrameTooLong {
                length,
                max: self.max_frame_length,
            });
        }

        let total = LENGTH_FIELD_LENGTH + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_FIELD_LENGTH);
        Ok(Some(src.split_to(length).freeze()))
    }

    /// Like [`decode_frame`](Self::decode_frame), but bytes of an incomplete frame are an
    /// error, since no more data will follow.
    pub fn decode_last_frame(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        match self.decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() || self.discarding > 0 => Ok(None),
            None => Err(CodecError::TruncatedFrame(src.len())),
        }
    }
}

impl ByteToMessageDecoder for LengthFieldFrameDecoder {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        Ok(self.decode_frame(src)?.map(|frame| Box::new(frame) as Message))
    }

    fn decode_last(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        Ok(self
            .decode_last_frame(src)?
            .map(|frame| Box::new(frame) as Message))
    }
}
