//! The event bus: prioritized, filterable publish/subscribe with isolation.
//!
//! # Dispatch
//!
//! [`EventBus::publish`] takes a snapshot of the subscriber table, keeps every
//! subscription whose topic pattern and filter accept the event, and runs them
//! in **descending priority tiers**:
//!
//! ```text
//! priority 10:  [handler A] [handler B]     (concurrent)
//!                      │ all terminated
//! priority  0:  [handler C]
//!                      │ all terminated
//! priority -5:  [handler D] [handler E]     (concurrent)
//! ```
//!
//! No handler of a lower tier is started before every handler of the higher
//! tier has terminated. Each invocation runs through
//! [`run_guarded`](crate::guard::run_guarded), so errors, panics and deadline
//! overruns are recorded in the [`DispatchReport`] and never reach the
//! publisher or the other handlers.
//!
//! # Registry mutation
//!
//! The subscriber table is copy-on-write: registration swaps in a new
//! `Arc<Vec<_>>`, dispatch iterates whichever snapshot it grabbed. Removing a
//! subscription additionally cancels its token, so an in-flight dispatch that
//! still holds the old snapshot will not start (or keep polling) the removed
//! handler once [`unsubscribe`](EventBus::unsubscribe) has returned.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, span, warn};

use crate::error::{BoxError, BusResult, HandlerFault};
use crate::event::{Event, Topic, TopicPattern, TopicRegistry};
use crate::guard::{HandlerOutcome, run_guarded};
use crate::owner::PluginId;

/// Default per-handler deadline.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Handler & Filter
// =============================================================================

/// Logic invoked for every event a subscription accepts.
///
/// Implemented for any `Fn(Arc<Event>) -> impl Future<Output = Result<(), BoxError>>`
/// closure, so most subscribers never implement it by hand:
///
/// ```rust,ignore
/// let handler = |event: Arc<Event>| async move {
///     tracing::info!(topic = %event.topic(), "got event");
///     Ok(())
/// };
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: Arc<Event>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> Result<(), BoxError> {
        (self)(event).await
    }
}

/// A shared event handler.
pub type BoxedEventHandler = Arc<dyn EventHandler>;

/// A side-effect-free predicate deciding whether a subscription sees an event.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

// =============================================================================
// Subscriber (declaration)
// =============================================================================

/// Declaration of a subscription, consumed by [`EventBus::subscribe`].
///
/// Plugins build these as plain data during their init hook; the plugin
/// manager registers them afterwards.
///
/// ```rust,ignore
/// let sub = Subscriber::new("message.*", handler)
///     .priority(10)
///     .filter(|e| e.source_id() != Some("bot"));
/// ```
#[derive(Clone)]
pub struct Subscriber {
    pattern: TopicPattern,
    filter: Option<EventFilter>,
    priority: i32,
    handler: BoxedEventHandler,
    owner: Option<PluginId>,
}

impl Subscriber {
    /// Declares a subscription with priority `0`, no filter and no owner.
    pub fn new(topic: impl Into<TopicPattern>, handler: impl EventHandler) -> Self {
        Self::from_arc(topic, Arc::new(handler))
    }

    /// Like [`new`](Self::new) but for an already shared handler.
    pub fn from_arc(topic: impl Into<TopicPattern>, handler: BoxedEventHandler) -> Self {
        Self {
            pattern: topic.into(),
            filter: None,
            priority: 0,
            handler,
            owner: None,
        }
    }

    /// Higher priorities run first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only dispatch events for which `filter` returns `true`.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Records the plugin this subscription belongs to.
    pub fn owner(mut self, owner: impl Into<PluginId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn owner_id(&self) -> Option<&PluginId> {
        self.owner.as_ref()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("owner", &self.owner)
            .finish()
    }
}

// =============================================================================
// Subscription (registered)
// =============================================================================

/// Unique id of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    owner: Option<PluginId>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn owner(&self) -> Option<&PluginId> {
        self.owner.as_ref()
    }
}

struct Subscription {
    id: SubscriptionId,
    decl: Subscriber,
    /// Cancelled on removal; stops pending and in-flight invocations.
    token: CancellationToken,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        if !self.decl.pattern.matches(event.topic()) || self.token.is_cancelled() {
            return false;
        }
        let Some(filter) = &self.decl.filter else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| filter(event))) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(
                    subscription = %self.id,
                    topic = %event.topic(),
                    "Subscription filter panicked, skipping"
                );
                false
            }
        }
    }
}

// =============================================================================
// DispatchReport
// =============================================================================

/// What happened to one handler during a publish.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub subscription: SubscriptionId,
    pub owner: Option<PluginId>,
    pub priority: i32,
    pub outcome: HandlerOutcome,
    pub elapsed: Duration,
}

/// Aggregated result of one [`EventBus::publish`] call.
///
/// Records appear in the order handlers were started (tier by tier).
#[derive(Debug, Clone)]
pub struct DispatchReport {
    topic: Topic,
    records: Vec<HandlerRecord>,
}

impl DispatchReport {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn records(&self) -> &[HandlerRecord] {
        &self.records
    }

    /// Number of handlers the event was dispatched to.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no subscription accepted the event.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of handlers that completed successfully.
    pub fn completed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.is_completed())
            .count()
    }

    /// Iterates over the faults, paired with the subscription that raised them.
    pub fn faults(&self) -> impl Iterator<Item = (SubscriptionId, &HandlerFault)> {
        self.records
            .iter()
            .filter_map(|r| r.outcome.fault().map(|f| (r.subscription, f)))
    }

    /// Returns `true` if every handler completed.
    pub fn is_clean(&self) -> bool {
        self.records.iter().all(|r| r.outcome.is_completed())
    }

    /// Returns the record for `id`, if it was dispatched to.
    pub fn record(&self, id: SubscriptionId) -> Option<&HandlerRecord> {
        self.records.iter().find(|r| r.subscription == id)
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// Central publish/subscribe register.
///
/// `EventBus` is `Send + Sync`; share it behind an `Arc`.
pub struct EventBus {
    registry: TopicRegistry,
    handler_timeout: Duration,
    subscriptions: RwLock<Arc<Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates a bus over `registry` with the default handler deadline.
    pub fn new(registry: TopicRegistry) -> Self {
        Self {
            registry,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            subscriptions: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sets the per-handler deadline (builder pattern).
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers a subscription.
    ///
    /// Fails with [`BusError::InvalidTopic`](crate::error::BusError::InvalidTopic)
    /// if the pattern selects no registered topic.
    pub fn subscribe(&self, subscriber: Subscriber) -> BusResult<SubscriptionHandle> {
        let mut handles = self.subscribe_all(vec![subscriber])?;
        Ok(handles.remove(0))
    }

    /// Registers several subscriptions in one swap.
    ///
    /// Every pattern is validated first; on failure nothing is registered.
    pub fn subscribe_all(&self, subscribers: Vec<Subscriber>) -> BusResult<Vec<SubscriptionHandle>> {
        for subscriber in &subscribers {
            self.registry.validate(&subscriber.pattern)?;
        }

        let entries: Vec<Arc<Subscription>> = subscribers
            .into_iter()
            .map(|decl| {
                let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                debug!(
                    subscription = %id,
                    topic = %decl.pattern,
                    priority = decl.priority,
                    owner = ?decl.owner.as_ref().map(PluginId::as_str),
                    "Subscribed"
                );
                Arc::new(Subscription {
                    id,
                    decl,
                    token: CancellationToken::new(),
                })
            })
            .collect();
        let handles = entries
            .iter()
            .map(|s| SubscriptionHandle {
                id: s.id,
                owner: s.decl.owner.clone(),
            })
            .collect();

        let mut table = self.subscriptions.write();
        let mut next = Vec::with_capacity(table.len() + entries.len());
        next.extend(table.iter().cloned());
        next.extend(entries);
        *table = Arc::new(next);

        Ok(handles)
    }

    /// Removes one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.remove_where(|s| s.id == handle.id) > 0
    }

    /// Removes every subscription owned by `owner` as one atomic swap.
    ///
    /// Returns the number of subscriptions removed; `0` if there were none.
    pub fn unsubscribe_all(&self, owner: &PluginId) -> usize {
        let removed = self.remove_where(|s| s.decl.owner.as_ref() == Some(owner));
        if removed > 0 {
            debug!(owner = %owner, removed, "Unsubscribed owner");
        }
        removed
    }

    /// Removes every subscription (core shutdown).
    pub fn clear(&self) {
        let removed = self.remove_where(|_| true);
        debug!(removed, "Cleared all subscriptions");
    }

    fn remove_where(&self, predicate: impl Fn(&Subscription) -> bool) -> usize {
        let removed: Vec<Arc<Subscription>> = {
            let mut table = self.subscriptions.write();
            let (gone, kept): (Vec<_>, Vec<_>) =
                table.iter().cloned().partition(|s| predicate(s));
            if gone.is_empty() {
                return 0;
            }
            *table = Arc::new(kept);
            gone
        };
        for sub in &removed {
            sub.token.cancel();
        }
        removed.len()
    }

    // ─── Introspection ──────────────────────────────────────────────────────

    /// Total number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Handles of the subscriptions owned by `owner`.
    pub fn subscriptions_for(&self, owner: &PluginId) -> Vec<SubscriptionHandle> {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.decl.owner.as_ref() == Some(owner))
            .map(|s| SubscriptionHandle {
                id: s.id,
                owner: s.decl.owner.clone(),
            })
            .collect()
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Dispatches `event` to every accepting subscription.
    ///
    /// Never fails: handler faults are collected in the returned report.
    pub async fn publish(&self, event: Event) -> DispatchReport {
        let event = Arc::new(event);
        let topic = event.topic().clone();
        let span = span!(Level::DEBUG, "publish", topic = %topic);

        async move {
            let snapshot = Arc::clone(&*self.subscriptions.read());
            let mut matched: Vec<Arc<Subscription>> = snapshot
                .iter()
                .filter(|s| s.accepts(&event))
                .cloned()
                .collect();
            // Stable: equal priorities keep registration order inside a tier.
            matched.sort_by(|a, b| b.decl.priority.cmp(&a.decl.priority));

            let mut records = Vec::with_capacity(matched.len());
            for tier in matched.chunk_by(|a, b| a.decl.priority == b.decl.priority) {
                let tier_records =
                    future::join_all(tier.iter().map(|sub| self.invoke(sub, &event))).await;
                records.extend(tier_records);
            }

            for record in &records {
                if let Some(fault) = record.outcome.fault() {
                    warn!(
                        subscription = %record.subscription,
                        owner = ?record.owner.as_ref().map(PluginId::as_str),
                        error = %fault,
                        "Handler fault during dispatch"
                    );
                }
            }
            debug!(dispatched = records.len(), "Dispatch finished");

            DispatchReport { topic, records }
        }
        .instrument(span)
        .await
    }

    /// Publishes several events, highest event priority first.
    ///
    /// Events with equal priority keep their relative order, and each event is
    /// fully dispatched before the next one starts.
    pub async fn publish_batch(&self, events: Vec<Event>) -> Vec<DispatchReport> {
        let mut events = events;
        events.sort_by(|a, b| b.priority().cmp(&a.priority()));
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            reports.push(self.publish(event).await);
        }
        reports
    }

    async fn invoke(&self, sub: &Arc<Subscription>, event: &Arc<Event>) -> HandlerRecord {
        let started = Instant::now();
        let handler = Arc::clone(&sub.decl.handler);
        let event = Arc::clone(event);
        let outcome = run_guarded(
            async move { handler.handle(event).await },
            self.handler_timeout,
            sub.token.clone(),
        )
        .await;

        HandlerRecord {
            subscription: sub.id,
            owner: sub.decl.owner.clone(),
            priority: sub.decl.priority,
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(TopicRegistry::builtin())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.registry.len())
            .field("subscriptions", &self.subscription_count())
            .field("handler_timeout", &self.handler_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;
    use crate::event::topics;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn group_message(text: &str) -> Event {
        Event::new(topics::MESSAGE_GROUP, json!({ "text": text })).with_source("10001")
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> impl EventHandler {
        move |_event: Arc<Event>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let bus = EventBus::default();
        let report = bus.publish(group_message("hi")).await;
        assert!(report.is_empty());
        assert!(report.is_clean());
        assert_eq!(report.topic().as_str(), topics::MESSAGE_GROUP);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic_fails() {
        let bus = EventBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        let err = bus
            .subscribe(Subscriber::new("message.carrier_pigeon", counting_handler(counter)))
            .unwrap_err();
        assert_eq!(err, BusError::InvalidTopic("message.carrier_pigeon".into()));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_topic_and_filter_matching() {
        let bus = EventBus::default();
        let exact = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        let filtered = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Subscriber::new(topics::MESSAGE_GROUP, counting_handler(exact.clone())))
            .unwrap();
        bus.subscribe(Subscriber::new("message.*", counting_handler(wildcard.clone())))
            .unwrap();
        bus.subscribe(
            Subscriber::new(topics::MESSAGE_GROUP, counting_handler(filtered.clone()))
                .filter(|e| e.text() == Some("pass")),
        )
        .unwrap();
        bus.subscribe(Subscriber::new(
            topics::NOTICE_MEMBER_INCREASE,
            counting_handler(other.clone()),
        ))
        .unwrap();

        bus.publish(group_message("pass")).await;
        bus.publish(group_message("block")).await;
        bus.publish(Event::new(topics::MESSAGE_PRIVATE, json!({}))).await;

        assert_eq!(exact.load(Ordering::SeqCst), 2);
        assert_eq!(wildcard.load(Ordering::SeqCst), 3);
        assert_eq!(filtered.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_higher_priority_tier_finishes_before_lower_starts() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        for (name, priority) in [("low", -5), ("high-a", 10), ("mid", 0), ("high-b", 10)] {
            let log = Arc::clone(&log);
            bus.subscribe(
                Subscriber::new(topics::MESSAGE_GROUP, move |_e: Arc<Event>| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().push(format!("start:{name}"));
                        tokio::task::yield_now().await;
                        log.lock().push(format!("end:{name}"));
                        Ok::<(), BoxError>(())
                    }
                })
                .priority(priority),
            )
            .unwrap();
        }

        let report = bus.publish(group_message("x")).await;
        assert_eq!(report.completed(), 4);

        let log = log.lock().clone();
        let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        for high in ["high-a", "high-b"] {
            assert!(pos(&format!("end:{high}")) < pos("start:mid"));
        }
        assert!(pos("end:mid") < pos("start:low"));

        let priorities: Vec<i32> = report.records().iter().map(|r| r.priority).collect();
        assert_eq!(&priorities[2..], &[0, -5]);
    }

    #[tokio::test]
    async fn test_faulty_handler_does_not_stop_others() {
        let bus = EventBus::default();
        let counter = Arc::new(AtomicUsize::new(0));

        let failing = bus
            .subscribe(Subscriber::new(topics::MESSAGE_GROUP, |_e: Arc<Event>| async {
                Err::<(), BoxError>("database is on fire".into())
            }))
            .unwrap();
        let panicking = bus
            .subscribe(Subscriber::new(topics::MESSAGE_GROUP, |_e: Arc<Event>| async {
                if true {
                    panic!("plugin bug");
                }
                Ok::<(), BoxError>(())
            }))
            .unwrap();
        let healthy = bus
            .subscribe(Subscriber::new(
                topics::MESSAGE_GROUP,
                counting_handler(counter.clone()),
            ))
            .unwrap();

        let report = bus.publish(group_message("x")).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(report.len(), 3);
        assert!(report.record(healthy.id()).unwrap().outcome.is_completed());
        assert!(matches!(
            report.record(failing.id()).unwrap().outcome,
            HandlerOutcome::Faulted(HandlerFault::Error(_))
        ));
        assert!(matches!(
            report.record(panicking.id()).unwrap().outcome,
            HandlerOutcome::Faulted(HandlerFault::Panic(_))
        ));
        assert_eq!(report.faults().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let bus = EventBus::default().with_handler_timeout(Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));

        let slow = bus
            .subscribe(Subscriber::new(topics::MESSAGE_GROUP, |_e: Arc<Event>| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<(), BoxError>(())
            }))
            .unwrap();
        bus.subscribe(Subscriber::new(
            topics::MESSAGE_GROUP,
            counting_handler(counter.clone()),
        ))
        .unwrap();

        let report = bus.publish(group_message("x")).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(
            report.record(slow.id()).unwrap().outcome,
            HandlerOutcome::Faulted(HandlerFault::Timeout(Duration::from_millis(100)))
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_all_is_idempotent() {
        let bus = EventBus::default();
        let owner = PluginId::from("weather");
        let counter = Arc::new(AtomicUsize::new(0));

        for topic in [topics::MESSAGE_GROUP, topics::MESSAGE_PRIVATE] {
            bus.subscribe(
                Subscriber::new(topic, counting_handler(counter.clone())).owner(&owner),
            )
            .unwrap();
        }
        let core = bus
            .subscribe(Subscriber::new(topics::MESSAGE_GROUP, counting_handler(counter.clone())))
            .unwrap();

        assert_eq!(bus.subscriptions_for(&owner).len(), 2);
        assert_eq!(bus.unsubscribe_all(&owner), 2);
        assert_eq!(bus.unsubscribe_all(&owner), 0);
        assert_eq!(bus.subscription_count(), 1);

        bus.publish(group_message("x")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(bus.unsubscribe(&core));
        assert!(!bus.unsubscribe(&core));
    }

    #[tokio::test]
    async fn test_unsubscribe_during_dispatch_prevents_later_invocation() {
        let bus = Arc::new(EventBus::default());
        let owner = PluginId::from("late");
        let late_calls = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        // High-priority gate holds the dispatch in its first tier.
        {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            bus.subscribe(
                Subscriber::new(topics::MESSAGE_GROUP, move |_e: Arc<Event>| {
                    let entered = Arc::clone(&entered);
                    let release = Arc::clone(&release);
                    async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok::<(), BoxError>(())
                    }
                })
                .priority(100),
            )
            .unwrap();
        }
        let late = bus
            .subscribe(
                Subscriber::new(topics::MESSAGE_GROUP, counting_handler(late_calls.clone()))
                    .owner(&owner),
            )
            .unwrap();

        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.publish(group_message("x")).await })
        };

        entered.notified().await;
        assert_eq!(bus.unsubscribe_all(&owner), 1);
        release.notify_one();

        let report = publisher.await.unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            report.record(late.id()).unwrap().outcome,
            HandlerOutcome::Cancelled
        );

        bus.publish(group_message("y")).await;
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_publishes_keep_order_per_subscriber() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(Subscriber::new(topics::MESSAGE_GROUP, move |e: Arc<Event>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(e.text().unwrap_or_default().to_string());
                    Ok::<(), BoxError>(())
                }
            }))
            .unwrap();
        }

        for text in ["1", "2", "3"] {
            bus.publish(group_message(text)).await;
        }
        assert_eq!(*seen.lock(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_publish_batch_orders_by_event_priority() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(Subscriber::new("*", move |e: Arc<Event>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(e.priority());
                    Ok::<(), BoxError>(())
                }
            }))
            .unwrap();
        }

        let reports = bus
            .publish_batch(vec![
                group_message("a").with_priority(1),
                group_message("b").with_priority(5),
                group_message("c").with_priority(1),
            ])
            .await;
        assert_eq!(reports.len(), 3);
        assert_eq!(*seen.lock(), vec![5, 1, 1]);
    }

    #[tokio::test]
    async fn test_panicking_filter_skips_subscription() {
        let bus = EventBus::default();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Subscriber::new(topics::MESSAGE_GROUP, counting_handler(counter.clone()))
                .filter(|_| panic!("bad filter")),
        )
        .unwrap();

        let report = bus.publish(group_message("x")).await;
        assert!(report.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
