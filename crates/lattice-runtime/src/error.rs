//! Runtime error types.

use lattice_core::BusError;
use lattice_framework::{PluginError, QueueError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`LatticeRuntime`](crate::LatticeRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The router could not subscribe to message topics.
    #[error("Failed to attach command router: {0}")]
    Bus(#[from] BusError),

    /// The plugin set could not be loaded (dependency graph errors).
    #[error("Failed to load plugins: {0}")]
    Plugin(#[from] PluginError),

    /// The outbound worker could not be started.
    #[error("Outbound queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
