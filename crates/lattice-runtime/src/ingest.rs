//! Turning inbound envelopes into bus events.
//!
//! The envelope `kind` must name a registered topic. The actor is the
//! envelope's `source_id`, else the payload's `user_id`. Two payload fields
//! are honoured as hints: `priority` (integer) and `time` (unix seconds).
//! A `time` that is unrepresentable or in the future is ignored, leaving the
//! receive time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lattice_core::{Envelope, Event, TopicRegistry};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
}

/// Builds the [`Event`] for an inbound envelope.
pub fn envelope_to_event(registry: &TopicRegistry, envelope: Envelope) -> Result<Event, IngestError> {
    let Some(topic) = registry.resolve(&envelope.kind) else {
        return Err(IngestError::UnknownTopic(envelope.kind));
    };

    let source = envelope
        .source_id
        .or_else(|| actor_from_payload(&envelope.payload));
    let priority = envelope
        .payload
        .get("priority")
        .and_then(Value::as_i64)
        .map(|p| p.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
    let timestamp = envelope
        .payload
        .get("time")
        .and_then(Value::as_u64)
        .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs)));

    let mut event = Event::new(topic, envelope.payload);
    if let Some(source) = source {
        event = event.with_source(source);
    }
    if let Some(priority) = priority {
        event = event.with_priority(priority);
    }
    if let Some(timestamp) = timestamp.filter(|t| *t <= SystemTime::now()) {
        event = event.with_timestamp(timestamp);
    }
    Ok(event)
}

fn actor_from_payload(payload: &Value) -> Option<String> {
    match payload.get("user_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::topics;
    use serde_json::json;

    #[test]
    fn test_message_envelope() {
        let registry = TopicRegistry::builtin();
        let envelope = Envelope::new(
            topics::MESSAGE_GROUP,
            json!({ "user_id": 10001, "group_id": 42, "raw_message": "/ping", "time": 1_700_000_000u64 }),
        );

        let event = envelope_to_event(&registry, envelope).unwrap();
        assert_eq!(event.topic().as_str(), topics::MESSAGE_GROUP);
        assert_eq!(event.source_id(), Some("10001"));
        assert_eq!(event.text(), Some("/ping"));
        assert_eq!(event.priority(), 0);
        assert_eq!(
            event.timestamp(),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_out_of_range_time_keeps_receive_time() {
        let registry = TopicRegistry::builtin();
        let before = SystemTime::now();

        for time in [json!(u64::MAX), json!(4_000_000_000_000u64)] {
            let envelope = Envelope::new(topics::MESSAGE_GROUP, json!({ "time": time }));
            let event = envelope_to_event(&registry, envelope).unwrap();
            assert!(event.timestamp() >= before);
            assert!(event.timestamp() <= SystemTime::now());
        }
    }

    #[test]
    fn test_explicit_source_and_priority_hint() {
        let registry = TopicRegistry::builtin();
        let envelope = Envelope::new(
            topics::NOTICE_GROUP_RECALL,
            json!({ "user_id": "ignored", "priority": 7 }),
        )
        .with_source("operator");

        let event = envelope_to_event(&registry, envelope).unwrap();
        assert_eq!(event.source_id(), Some("operator"));
        assert_eq!(event.priority(), 7);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let registry = TopicRegistry::builtin();
        let err = envelope_to_event(&registry, Envelope::new("message.unknown", json!({})))
            .unwrap_err();
        assert_eq!(err, IngestError::UnknownTopic("message.unknown".into()));

        let custom = TopicRegistry::builtin().with_topic("custom.poke".to_string());
        assert!(envelope_to_event(&custom, Envelope::new("custom.poke", json!({}))).is_ok());
    }
}
