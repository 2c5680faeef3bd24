//! # Conduit Demos
//!
//! A server showing how an I/O loop drives a [`conduit::Pipeline`], and the stages it runs.
//!
//! ## Running Examples
//!
//! ```bash
//! cargo run --example object_echo_server -- --debug
//! ```
//!
//! Peers exchange JSON objects framed by `conduit-codec`'s length-prefixed object codec:
//! each [`Request`] is answered with a [`Reply`]. A client is any pipeline built with
//! [`add_object_codec::<Reply, Request>`](add_object_codec).

#![warn(rust_2018_idioms)]

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit::{BufferSpec, Context, Handler, HandlerFault, Pipeline, PipelineConfig, PipelineError};
use conduit_codec::{JsonSerializer, ObjectDecoder, ObjectEncoder};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-side sequence number, echoed back.
    pub seq: u64,
    /// Line typed by the user.
    pub text: String,
}

/// Sent by the server for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Sequence number of the request being answered.
    pub seq: u64,
    /// Echoed text, possibly transformed by the server's stages.
    pub text: String,
    /// Names of the server stages at the time of the reply.
    pub stages: Vec<String>,
}

/// Installs the object codec as the first two stages: `decoder` reads `In` values, `encoder`
/// writes `Out` values.
pub fn add_object_codec<In, Out>(
    pipeline: &Pipeline,
    max_object_size: usize,
) -> Result<(), PipelineError>
where
    In: Serialize + DeserializeOwned + Send + 'static,
    Out: Serialize + DeserializeOwned + Send + 'static,
{
    let decoder = ObjectDecoder::with_max_object_size(JsonSerializer::<In>::new(), max_object_size);
    let encoder = ObjectEncoder::new(JsonSerializer::<Out>::new());
    pipeline
        .add_first("encoder", Arc::new(encoder.into_handler()))?
        .add_first("decoder", Arc::new(decoder.into_handler()))?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Upper-cases request text. Inserted and removed at runtime by [`EchoHandler`].
pub struct ShoutHandler;

impl Handler for ShoutHandler {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::messages())
    }

    fn is_sharable(&self) -> bool {
        true
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        let Some(queue) = ctx.inbound_messages() else {
            return Ok(());
        };
        let next = ctx.next_inbound_messages();
        for msg in queue.drain() {
            match msg.downcast::<Request>() {
                Ok(mut request) => {
                    request.text = request.text.to_uppercase();
                    next.push(request);
                }
                Err(other) => next.push(other),
            }
        }
        ctx.fire_inbound_updated();
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Answers every request and closes idle connections.
///
/// `/shout` and `/quiet` reconfigure the connection's own pipeline while it is running;
/// `/bye` closes it.
pub struct EchoHandler {
    idle_timeout: Duration,
    last_seen: Mutex<Instant>,
}

impl EchoHandler {
    /// Creates a handler closing the connection after `idle_timeout` without requests.
    pub fn new(idle_timeout: Duration) -> Self {
        EchoHandler {
            idle_timeout,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn command(&self, ctx: &Context<'_>, text: &str) -> Result<(), HandlerFault> {
        let pipeline = ctx.pipeline();
        match text {
            "/shout" if !pipeline.contains("shout") => {
                pipeline.add_before(ctx.name(), "shout", Arc::new(ShoutHandler))?;
            }
            "/quiet" if pipeline.contains("shout") => {
                pipeline.remove("shout")?;
            }
            "/bye" => ctx.close(),
            _ => {}
        }
        Ok(())
    }
}

impl Handler for EchoHandler {
    fn inbound(&self) -> Option<BufferSpec> {
        Some(BufferSpec::messages())
    }

    fn inbound_updated(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        let Some(queue) = ctx.inbound_messages() else {
            return Ok(());
        };
        *self.last_seen.lock() = Instant::now();

        for msg in queue.drain() {
            let request = msg
                .downcast::<Request>()
                .map_err(|_| HandlerFault::msg("unexpected message type"))?;
            info!("received #{}: {}", request.seq, request.text);

            // the stages as they are when this request was handled
            let stages = ctx.pipeline().names();
            ctx.write(Box::new(Reply {
                seq: request.seq,
                text: request.text.clone(),
                stages,
            }));
            self.command(ctx, request.text.to_lowercase().trim())?;
        }
        ctx.flush();
        Ok(())
    }

    fn read_eof(&self, ctx: &Context<'_>) -> Result<(), HandlerFault> {
        ctx.close();
        Ok(())
    }

    fn handle_timeout(&self, ctx: &Context<'_>, now: Instant) -> Result<(), HandlerFault> {
        let deadline = *self.last_seen.lock() + self.idle_timeout;
        if now >= deadline {
            info!("closing idle connection");
            ctx.close();
        }
        //last handler, no need to fire_handle_timeout
        Ok(())
    }

    fn poll_timeout(&self, _ctx: &Context<'_>, eto: &mut Instant) {
        let deadline = *self.last_seen.lock() + self.idle_timeout;
        if deadline < *eto {
            *eto = deadline;
        }
    }

    fn exception_caught(&self, ctx: &Context<'_>, fault: HandlerFault) -> Result<(), HandlerFault> {
        warn!("closing after fault: {}", fault);
        ctx.close();
        Ok(())
    }
}

/// Builds the server side of one connection: object codec, then [`EchoHandler`].
pub fn echo_pipeline(
    idle: Duration,
    max_object_size: usize,
    peer: &str,
) -> Result<Pipeline, PipelineError> {
    let pipeline = Pipeline::with_config(PipelineConfig::default().with_name(peer));
    add_object_codec::<Request, Reply>(&pipeline, max_object_size)?;
    pipeline.add_last("echo", Arc::new(EchoHandler::new(idle)))?;
    Ok(pipeline)
}

/// Installs the `file:line [LEVEL] time - message` logger shared by all demos.
pub fn init_logger(level: log::LevelFilter) {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}
