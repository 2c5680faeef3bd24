use conduit::HandlerFault;
use thiserror::Error;

/// Boxed error raised by a serialization collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while framing, encoding or decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A length prefix announced more bytes than the decoder accepts.
    ///
    /// The offending frame is discarded; decoding resumes with the frame after it.
    #[error("frame of {length} bytes exceeds the maximum of {max}")]
    FrameTooLong {
        /// Announced payload length.
        length: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An encoded payload does not fit the 32-bit length prefix.
    #[error("encoded payload of {0} bytes does not fit a 32-bit length prefix")]
    FrameTooLarge(usize),

    /// The stream ended in the middle of a frame.
    #[error("stream ended with {0} bytes of an incomplete frame")]
    TruncatedFrame(usize),

    /// The encoder was handed a value of a type it cannot encode.
    #[error("cannot encode a value that is not a {0}")]
    UnexpectedType(&'static str),

    /// The serialization collaborator failed to write a value.
    #[error("failed to serialize object")]
    Serialize(#[source] BoxError),

    /// The serialization collaborator failed to read a payload.
    #[error("failed to deserialize object")]
    Deserialize(#[source] BoxError),
}

impl From<CodecError> for HandlerFault {
    fn from(err: CodecError) -> Self {
        HandlerFault::new(err)
    }
}
