//! The connection abstraction consumed by the core.
//!
//! Talking to the messaging gateway (handshakes, framing, wire format) is the
//! job of a transport crate. The core only needs to hand envelopes to it and
//! pull envelopes out of it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SendResult;

/// An opaque payload exchanged with the gateway.
///
/// For inbound envelopes `kind` names the event topic (e.g. `message.group`);
/// for outbound envelopes it names the gateway action (e.g. `send_group_msg`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            source_id: None,
            payload,
        }
    }

    /// Sets the originating actor (builder pattern).
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Gateway-assigned message id, when the action produced one.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Raw response data.
    #[serde(default)]
    pub data: Value,
}

/// A live link to the messaging gateway.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Sends one envelope.
    ///
    /// Returns [`SendError::Transient`](crate::error::SendError::Transient) for
    /// failures worth retrying and
    /// [`SendError::Fatal`](crate::error::SendError::Fatal) otherwise.
    async fn send(&self, envelope: &Envelope) -> SendResult<Ack>;

    /// Waits for the next inbound envelope.
    ///
    /// `None` means the inbound stream has ended; a restartable connection may
    /// yield envelopes again after reconnecting.
    async fn receive(&self) -> Option<Envelope>;
}

/// A shared connection.
pub type BoxedConnection = Arc<dyn Connection>;
