//! Error types for structural pipeline operations and runtime handler faults.
//!
//! Two families of failure exist:
//!
//! - [`PipelineError`] is returned synchronously from the mutating operations
//!   (`add_*`, `remove`, `replace`). The pipeline is left exactly as it was.
//! - [`HandlerFault`] is raised by a handler while it processes an event. It never
//!   unwinds to the caller; instead it travels the fault channel described on
//!   [`Handler::exception_caught`](crate::Handler::exception_caught).

use std::{error::Error as StdError, fmt, io};

use thiserror::Error;

use crate::buffer::BufferKind;
use crate::handler::Direction;

/// Structural and configuration errors reported by pipeline mutations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A handler is already registered under this name.
    #[error("duplicate handler name \"{0}\"")]
    DuplicateName(String),

    /// No handler is registered under this name.
    #[error("no such handler \"{0}\" in pipeline")]
    NotFound(String),

    /// Two adjacent handlers disagree on the buffer kind they exchange.
    #[error(
        "buffer kind mismatch at \"{name}\" ({direction}): expected {expected}, found {found}"
    )]
    BufferKindMismatch {
        /// Name of the entry being added or replaced.
        name: String,
        /// Traversal direction in which the disagreement was found.
        direction: Direction,
        /// Kind the consuming side requires.
        expected: BufferKind,
        /// Kind the producing side emits.
        found: BufferKind,
    },

    /// A non-sharable handler instance is already bound to an entry.
    #[error("handler for \"{0}\" is not sharable and is already bound to a pipeline")]
    NotShareable(String),
}

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A runtime failure raised by a handler while processing an event.
///
/// The fault remembers the entry it was first raised from, which is filled in by the
/// pipeline when the handler returns it.
pub struct HandlerFault {
    origin: Option<String>,
    cause: BoxError,
}

impl HandlerFault {
    /// Wraps any error as a handler fault.
    pub fn new<E>(cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            origin: None,
            cause: cause.into(),
        }
    }

    /// Creates a fault from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(message.to_string())
    }

    /// Name of the entry whose handler first raised this fault, if known.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// The underlying error.
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.cause
    }

    /// Attempts to downcast the underlying error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    pub(crate) fn with_origin(mut self, name: &str) -> Self {
        if self.origin.is_none() {
            self.origin = Some(name.to_owned());
        }
        self
    }
}

impl fmt::Debug for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFault")
            .field("origin", &self.origin)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "handler \"{}\" failed: {}", origin, self.cause),
            None => write!(f, "{}", self.cause),
        }
    }
}

impl StdError for HandlerFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

impl From<PipelineError> for HandlerFault {
    fn from(err: PipelineError) -> Self {
        Self::new(err)
    }
}

impl From<io::Error> for HandlerFault {
    fn from(err: io::Error) -> Self {
        Self::new(err)
    }
}

impl From<&str> for HandlerFault {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<String> for HandlerFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
