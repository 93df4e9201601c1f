//! Unified error types for the Lattice core.
//!
//! Framework-level errors (command registration, plugin lifecycle, outbound
//! delivery) are defined in `lattice-framework`.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by event and command handlers.
///
/// Handlers may fail with any error type; the bus and router only keep its
/// rendered message.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Bus Errors
// =============================================================================

/// Errors returned by [`EventBus`](crate::bus::EventBus) registration calls.
///
/// Dispatch never fails; faults observed during dispatch are reported through
/// [`DispatchReport`](crate::bus::DispatchReport) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The topic (or wildcard category) is not known to the topic registry.
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
}

// =============================================================================
// Handler Faults
// =============================================================================

/// A fault caught while running a single handler invocation.
///
/// Faults are contained to the invocation that raised them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerFault {
    /// The handler returned an error.
    #[error("handler returned an error: {0}")]
    Error(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// The handler exceeded its deadline and was cancelled.
    #[error("handler exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl HandlerFault {
    /// Returns `true` for the deadline variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// =============================================================================
// Connection Errors
// =============================================================================

/// Failure reported by a [`Connection`](crate::connection::Connection) send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send may succeed if retried later.
    #[error("transient send failure: {0}")]
    Transient(String),

    /// The send cannot succeed; retrying is pointless.
    #[error("fatal send failure: {0}")]
    Fatal(String),
}

impl SendError {
    /// Returns `true` if the failure is retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for bus registration.
pub type BusResult<T> = Result<T, BusError>;

/// Result type for connection sends.
pub type SendResult<T> = Result<T, SendError>;
