//! Pipeline configuration.
//!
//! ```rust
//! use conduit::{BufferKind, FaultPolicy, PipelineConfig};
//!
//! let config = PipelineConfig::default()
//!     .with_name("udp-peer")
//!     .with_transport(BufferKind::MessageQueue)
//!     .with_fault_policy(FaultPolicy::Ignore);
//! assert_eq!(config.name, "udp-peer");
//! ```

use serde::{Deserialize, Serialize};

use crate::buffer::BufferKind;

/// What the pipeline does with a fault no handler consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the fault, record it and close the connection.
    #[default]
    Close,
    /// Log the fault and record it; the connection stays open.
    Ignore,
}

/// Per-pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Label used in log lines.
    pub name: String,
    /// Kind the transport delivers inbound and accepts outbound.
    pub transport: BufferKind,
    /// Handling of faults that reach either end of the chain.
    pub fault_policy: FaultPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_owned(),
            transport: BufferKind::ByteStream,
            fault_policy: FaultPolicy::Close,
        }
    }
}

impl PipelineConfig {
    /// Sets the log label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the transport kind.
    pub fn with_transport(mut self, transport: BufferKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the unhandled fault policy.
    pub fn with_fault_policy(mut self, fault_policy: FaultPolicy) -> Self {
        self.fault_policy = fault_policy;
        self
    }
}
