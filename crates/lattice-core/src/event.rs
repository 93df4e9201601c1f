//! Events, topics and the static topic registry.
//!
//! Every inbound envelope becomes an immutable [`Event`] whose [`Topic`] is used
//! for subscription matching. Topics are plain dotted names grouped into
//! categories by their first segment:
//!
//! ```text
//! message.group          notice.member_increase      request.friend
//! message.private        notice.member_decrease      request.group
//!                        notice.group_recall         meta.lifecycle
//!                        notice.friend_add           meta.heartbeat
//! ```
//!
//! Subscriptions name either an exact topic, a whole category (`message.*`) or
//! every topic (`*`). See [`TopicPattern`].

use std::borrow::{Borrow, Cow};
use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BusError, BusResult};

/// Names of the built-in topics.
pub mod topics {
    pub const MESSAGE_GROUP: &str = "message.group";
    pub const MESSAGE_PRIVATE: &str = "message.private";
    pub const NOTICE_MEMBER_INCREASE: &str = "notice.member_increase";
    pub const NOTICE_MEMBER_DECREASE: &str = "notice.member_decrease";
    pub const NOTICE_GROUP_RECALL: &str = "notice.group_recall";
    pub const NOTICE_FRIEND_ADD: &str = "notice.friend_add";
    pub const REQUEST_FRIEND: &str = "request.friend";
    pub const REQUEST_GROUP: &str = "request.group";
    pub const META_LIFECYCLE: &str = "meta.lifecycle";
    pub const META_HEARTBEAT: &str = "meta.heartbeat";

    /// Every built-in topic.
    pub const BUILTIN: &[&str] = &[
        MESSAGE_GROUP,
        MESSAGE_PRIVATE,
        NOTICE_MEMBER_INCREASE,
        NOTICE_MEMBER_DECREASE,
        NOTICE_GROUP_RECALL,
        NOTICE_FRIEND_ADD,
        REQUEST_FRIEND,
        REQUEST_GROUP,
        META_LIFECYCLE,
        META_HEARTBEAT,
    ];
}

// =============================================================================
// Topic
// =============================================================================

/// A named category of [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Cow<'static, str>);

impl Topic {
    /// Creates a topic from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Returns the full topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the category: the segment before the first `.`.
    pub fn category(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Returns `true` if this is a `message.*` topic.
    pub fn is_message(&self) -> bool {
        self.category() == "message"
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Topic {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

// =============================================================================
// TopicPattern
// =============================================================================

/// The topic selector of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Matches exactly one topic.
    Exact(Topic),
    /// Matches every topic in a category (`message.*`).
    Category(String),
    /// Matches every topic (`*`).
    Any,
}

impl TopicPattern {
    /// Parses a selector: `*`, `<category>.*` or an exact topic name.
    pub fn parse(selector: &str) -> Self {
        if selector == "*" {
            Self::Any
        } else if let Some(category) = selector.strip_suffix(".*") {
            Self::Category(category.to_string())
        } else {
            Self::Exact(Topic::from(selector.to_string()))
        }
    }

    /// Returns `true` if `topic` is selected by this pattern.
    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            Self::Exact(t) => t == topic,
            Self::Category(c) => topic.category() == c,
            Self::Any => true,
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => write!(f, "{t}"),
            Self::Category(c) => write!(f, "{c}.*"),
            Self::Any => f.write_str("*"),
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(selector: &str) -> Self {
        Self::parse(selector)
    }
}

impl From<Topic> for TopicPattern {
    fn from(topic: Topic) -> Self {
        Self::Exact(topic)
    }
}

// =============================================================================
// TopicRegistry
// =============================================================================

/// The static set of topics the bus accepts.
///
/// Fixed once the bus is constructed; subscriptions to anything outside it
/// fail with [`BusError::InvalidTopic`].
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: BTreeSet<Topic>,
}

impl TopicRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the [built-in topics](topics::BUILTIN).
    pub fn builtin() -> Self {
        topics::BUILTIN
            .iter()
            .fold(Self::new(), |reg, name| reg.with_topic(*name))
    }

    /// Adds a topic (builder pattern).
    pub fn with_topic(mut self, topic: impl Into<Topic>) -> Self {
        self.topics.insert(topic.into());
        self
    }

    /// Returns `true` if `name` is a registered topic.
    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains(name)
    }

    /// Looks up the registered topic called `name`.
    pub fn resolve(&self, name: &str) -> Option<Topic> {
        self.topics.get(name).cloned()
    }

    /// Checks that `pattern` selects at least one registered topic.
    pub fn validate(&self, pattern: &TopicPattern) -> BusResult<()> {
        let known = match pattern {
            TopicPattern::Exact(t) => self.topics.contains(t),
            TopicPattern::Category(c) => self.topics.iter().any(|t| t.category() == c),
            TopicPattern::Any => !self.topics.is_empty(),
        };
        if known {
            Ok(())
        } else {
            Err(BusError::InvalidTopic(pattern.to_string()))
        }
    }

    /// Iterates over all registered topics in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.topics.iter()
    }

    /// Returns the number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Returns `true` if no topic is registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable inbound event.
///
/// Created by the ingestion boundary and shared read-only (behind an `Arc`)
/// with every subscriber it is dispatched to.
#[derive(Debug, Clone)]
pub struct Event {
    topic: Topic,
    payload: Value,
    timestamp: SystemTime,
    source_id: Option<String>,
    priority: i32,
}

impl Event {
    /// Creates an event stamped with the current time and priority `0`.
    pub fn new(topic: impl Into<Topic>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: SystemTime::now(),
            source_id: None,
            priority: 0,
        }
    }

    /// Sets the originating actor (builder pattern).
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Sets the event priority (builder pattern).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the timestamp (builder pattern).
    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// The actor (user, or group for group-level notices) that caused the event.
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the plain text of a message event.
    ///
    /// Reads the payload's `text` field, falling back to `raw_message`.
    pub fn text(&self) -> Option<&str> {
        self.payload
            .get("text")
            .or_else(|| self.payload.get("raw_message"))
            .and_then(Value::as_str)
    }

    /// Deserializes the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}
