//! Lattice Runtime - configuration, logging and orchestration.
//!
//! This crate provides:
//! - Layered configuration loading ([`ConfigLoader`], [`LatticeConfig`])
//! - Logging setup on `tracing-subscriber` ([`LoggingBuilder`])
//! - The ingestion boundary from connection envelopes to bus events
//! - The [`LatticeRuntime`] that wires bus, router, plugins and outbound queue
//!   to a connection and drives the inbound pump
//!
//! ```ignore
//! use lattice_runtime::LatticeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LatticeRuntime::builder().plugin(ping_plugin()).build()?;
//!     runtime.run(connect().await?).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, LatticeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use ingest::{IngestError, envelope_to_event};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{LatticeRuntime, RuntimeBuilder};

// Re-export tracing for use by plugins
pub use tracing;
pub use tracing_subscriber;

/// Logging macros, for `use lattice_runtime::prelude::*`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
