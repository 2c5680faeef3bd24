//! # Conduit Codec - Framing and Object Codecs for Conduit
//!
//! `conduit-codec` provides reusable pipeline stages for [`conduit`] pipelines:
//! generic encoder/decoder adapters, a length-prefixed frame decoder, and an object codec
//! that frames serialized values.
//!
//! ## Features
//!
//! - **Encoder/decoder adapters**: implement [`MessageToByteEncoder`] or
//!   [`ByteToMessageDecoder`] and let [`EncoderHandler`] / [`DecoderHandler`] do the
//!   buffer bookkeeping
//! - **Length-prefixed framing**: [`LengthFieldFrameDecoder`] with a frame size limit
//! - **Object codec**: [`ObjectEncoder`] and [`ObjectDecoder`] around a pluggable
//!   [`ObjectSerializer`] ([`JsonSerializer`] for any `serde` type)
//!
//! ## Wire Format
//!
//! ```text
//!   +--------+--------+--------+--------+---------------------------+
//!   |   payload length (u32, big-endian) |  payload (length bytes)  |  ... next frame
//!   +--------+--------+--------+--------+---------------------------+
//! ```
//!
//! There is no delimiter besides the length prefix. Only a decoder using the same
//! serializer can read the payloads back.
//!
//! ## Building a Pipeline with Codecs
//!
//! ```rust
//! use std::sync::Arc;
//! use conduit::Pipeline;
//! use conduit_codec::{JsonSerializer, ObjectDecoder, ObjectEncoder};
//!
//! let decoder = ObjectDecoder::new(JsonSerializer::<String>::new());
//! let encoder = ObjectEncoder::new(JsonSerializer::<String>::new());
//!
//! let pipeline = Pipeline::new();
//! pipeline
//!     .add_last("decoder", Arc::new(decoder.into_handler()))?
//!     .add_last("encoder", Arc::new(encoder.into_handler()))?;
//!
//! // outbound: value -> frame
//! pipeline.write_and_flush(Box::new(String::from("ping")));
//! let frame = pipeline.poll_write().unwrap();
//! assert_eq!(&frame[..], b"\x00\x00\x00\x06\"ping\"");
//!
//! // inbound: frame -> value
//! pipeline.handle_read(&frame);
//! let received = pipeline.take_inbound_messages();
//! assert_eq!(*received[0].downcast_ref::<String>().unwrap(), "ping");
//! # Ok::<(), conduit::PipelineError>(())
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

// ========================================
// Module Declarations
// ========================================

/// Inbound decoding adapter
pub mod decoder;

/// Outbound encoding adapter
pub mod encoder;

/// Codec errors
pub mod error;

/// Length-prefixed frame decoder
pub mod length_field;

/// Object decoder
pub mod object_decoder;

/// Object encoder
pub mod object_encoder;

/// Serialization collaborators
pub mod serializer;

// ========================================
// Public Exports
// ========================================

pub use decoder::{ByteToMessageDecoder, DecoderHandler};
pub use encoder::{EncoderHandler, MessageToByteEncoder};
pub use error::CodecError;
pub use length_field::{LENGTH_FIELD_LENGTH, LengthFieldFrameDecoder};
pub use object_decoder::{DEFAULT_MAX_OBJECT_SIZE, ObjectDecoder};
pub use object_encoder::ObjectEncoder;
pub use serializer::{JsonSerializer, ObjectSerializer};
