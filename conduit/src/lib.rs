//! # Conduit - Live-Reconfigurable Handler Pipelines
//!
//! `conduit` is a connection-scoped event pipeline in the style of
//! [Netty](https://netty.io): an ordered chain of named handlers through which inbound (read)
//! and outbound (write) events flow. Framing, encoding and business logic are written as
//! independent stages that can be inserted, removed or swapped on a live connection.
//!
//! The pipeline does no I/O of its own. Whatever owns the socket feeds it with
//! [`Pipeline::handle_read`] and drains it with [`Pipeline::poll_write`].
//!
//! ## Core Concepts
//!
//! ### Pipeline
//!
//! The [`Pipeline`] owns the chain. Handlers are registered under unique names with
//! [`add_first`](Pipeline::add_first), [`add_last`](Pipeline::add_last),
//! [`add_before`](Pipeline::add_before) and [`add_after`](Pipeline::add_after), and changed
//! at runtime with [`remove`](Pipeline::remove) and [`replace`](Pipeline::replace), from any
//! thread, while events are in flight.
//!
//! ### Handler
//!
//! A [`Handler`] declares which directions it takes part in and, per direction, the
//! [`BufferKind`] it consumes and produces. Handlers exchange data through buffer holders
//! rather than call arguments, so a stage can batch, split or hold back data freely.
//!
//! ### Buffer holders
//!
//! A [`BufferHolder`] is either a [`ByteStream`] (raw octets) or a [`MessageQueue`]
//! (decoded values). Adjacent handlers must agree on the kind; this is checked when a
//! handler is added.
//!
//! ## Event Flow
//!
//! ```text
//!                                                       | write() / flush()
//!   +---------------------------------------------------+---------------+
//!   |                             Pipeline              |               |
//!   |                                                  \|/              |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |    |                      Handler "app"                      |    |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |              /|\                                  |               |
//!   |               |                                   |               |
//!   |     ctx.fire_inbound_updated()            ctx.write() / ctx.flush()|
//!   |               |                                   |               |
//!   |               |                                  \|/              |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |    |                     Handler "codec"                     |    |
//!   |    +----------+----------+------------+-----------+----------+    |
//!   |              /|\                                  |               |
//!   +---------------+-----------------------------------+---------------+
//!                   |                                  \|/
//!   +---------------+-----------------------------------+---------------+
//!   |       handle_read()                        poll_write()           |
//!   |                                                                   |
//!   |                    I/O layer (socket, event loop)                 |
//!   +-------------------------------------------------------------------+
//! ```
//!
//! ## Faults
//!
//! Handlers return `Result<(), HandlerFault>` from every event. A fault is offered to the
//! next handler's [`exception_caught`](Handler::exception_caught) in the same direction.
//! If it reaches the end of the chain it is logged, kept for
//! [`take_unhandled_faults`](Pipeline::take_unhandled_faults) and, under the default
//! [`FaultPolicy::Close`], the pipeline closes.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use conduit::{BufferSpec, Context, Handler, HandlerFault, Pipeline};
//!
//! /// Splits the byte stream into lines.
//! struct Lines;
//!
//! impl Handler for Lines {
//!     fn inbound(&self) -> Option<BufferSpec> {
//!         Some(BufferSpec::decoder())
//!     }
//!
//!     fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
//!         let Some(input) = ctx.inbound_bytes() else {
//!             return Ok(());
//!         };
//!         let out = ctx.next_inbound_messages();
//!         loop {
//!             let head = input.peek(input.len());
//!             let Some(end) = head.iter().position(|b| *b == b'\n') else {
//!                 break;
//!             };
//!             let line = input.drain(end + 1);
//!             let text = String::from_utf8_lossy(&line[..end]).into_owned();
//!             out.push(Box::new(text));
//!         }
//!         ctx.fire_inbound_updated();
//!         Ok(())
//!     }
//! }
//!
//! let pipeline = Pipeline::new();
//! pipeline.add_last("lines", Arc::new(Lines))?;
//!
//! pipeline.handle_read(b"hello\nwor");
//! pipeline.handle_read(b"ld\n");
//!
//! let lines: Vec<String> = pipeline
//!     .take_inbound_messages()
//!     .into_iter()
//!     .filter_map(|m| m.downcast::<String>().ok().map(|s| *s))
//!     .collect();
//! assert_eq!(lines, ["hello", "world"]);
//! # Ok::<(), conduit::PipelineError>(())
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

// ========================================
// Module Declarations
// ========================================

/// Byte-stream and message-queue holders
pub(crate) mod buffer;

/// Pipeline settings
pub(crate) mod config;

/// Handler view of the pipeline
pub(crate) mod context;

/// Chain entries and snapshots (not part of public API)
pub(crate) mod entry;

/// Structural errors and runtime faults
pub(crate) mod error;

/// The handler trait and its declarations
pub(crate) mod handler;

/// The pipeline itself
pub(crate) mod pipeline;

// ========================================
// Public Exports
// ========================================

/// Buffer holder types
pub use buffer::{BufferHolder, BufferKind, ByteStream, Message, MessageQueue, into_bytes};

/// Configuration
pub use config::{FaultPolicy, PipelineConfig};

/// Context passed to handlers
pub use context::Context;

/// Error types
pub use error::{HandlerFault, PipelineError};

/// Handler trait and declarations
pub use handler::{BufferSpec, Capabilities, Direction, Handler};

/// Pipeline and its write notification callback
pub use pipeline::{NotifyCallback, Pipeline};
