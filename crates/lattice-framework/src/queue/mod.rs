//! Priority + rate-limited outbound queue.
//!
//! Producers (command handlers, plugins) [`enqueue`](OutboundQueue::enqueue)
//! envelopes and get a [`Ticket`] back. A single consumer started with
//! [`spawn`](OutboundQueue::spawn) hands them to the [`Connection`]:
//!
//! ```text
//! enqueue ──► [ready heap: priority ↓, FIFO] ──► token bucket ──► connection.send
//!                 ▲                                                     │
//!                 └──── [delayed: enqueue_delayed, retry backoff] ◄─────┘ transient error
//! ```
//!
//! The queue is bounded: `enqueue` fails fast with
//! [`QueueError::QueueFull`] instead of blocking.
//!
//! [`Connection`]: lattice_core::Connection

mod bucket;
mod ticket;
mod worker;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lattice_core::{Ack, Envelope};
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::trace;

use crate::error::{DeliveryError, QueueError, QueueResult};

pub use bucket::TokenBucket;
pub use ticket::Ticket;
pub use worker::QueueWorker;

/// What a [`Ticket`] resolves to.
pub type DeliveryResult = Result<Ack, DeliveryError>;

// =============================================================================
// Configuration
// =============================================================================

/// Exponential backoff between send retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Outbound queue settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Maximum number of requests waiting to be sent.
    pub capacity: usize,
    /// Sends allowed per `per` window; `0` disables rate limiting.
    pub rate: u32,
    pub per: Duration,
    /// Sends allowed back to back before the rate applies.
    pub burst: u32,
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            rate: 20,
            per: Duration::from_secs(1),
            burst: 1,
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Identifier of an enqueued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A request owned by the queue until it is delivered or fails for good.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub id: RequestId,
    pub envelope: Envelope,
    pub priority: i32,
    pub enqueued_at: Instant,
    pub retry_count: u32,
}

struct Pending {
    request: OutboundRequest,
    ready_at: Instant,
    reply: oneshot::Sender<DeliveryResult>,
}

impl Pending {
    fn resolve(self, result: DeliveryResult) {
        // The producer may have dropped its ticket.
        let _ = self.reply.send(result);
    }
}

// Max-heap: higher priority first, then lower id (earlier enqueue).
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.request
            .priority
            .cmp(&other.request.priority)
            .then_with(|| other.request.id.cmp(&self.request.id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.request.id == other.request.id
    }
}

impl Eq for Pending {}

// =============================================================================
// Shared state
// =============================================================================

struct InFlight {
    id: RequestId,
    cancelled: bool,
}

#[derive(Default)]
struct State {
    ready: BinaryHeap<Pending>,
    delayed: Vec<Pending>,
    next_id: u64,
    in_flight: Option<InFlight>,
    closed: bool,
    worker_attached: bool,
}

impl State {
    fn waiting(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    fn is_idle(&self) -> bool {
        self.waiting() == 0 && self.in_flight.is_none()
    }

    /// Moves delayed requests whose time has come into the ready heap.
    fn promote(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].ready_at <= now {
                let pending = self.delayed.swap_remove(i);
                self.ready.push(pending);
            } else {
                i += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|p| p.ready_at).min()
    }

    fn remove(&mut self, id: RequestId) -> Option<Pending> {
        if let Some(pos) = self.delayed.iter().position(|p| p.request.id == id) {
            return Some(self.delayed.swap_remove(pos));
        }
        if !self.ready.iter().any(|p| p.request.id == id) {
            return None;
        }
        let mut items = std::mem::take(&mut self.ready).into_vec();
        let pos = items.iter().position(|p| p.request.id == id)?;
        let pending = items.swap_remove(pos);
        self.ready = BinaryHeap::from(items);
        Some(pending)
    }
}

pub(crate) struct Inner {
    config: QueueConfig,
    state: Mutex<State>,
    /// Wakes the consumer: new work, or a shutdown request.
    wakeup: Notify,
    /// Fires whenever the queue becomes idle.
    idle: Notify,
}

impl Inner {
    /// Waits until at least one request is ready to send.
    async fn wait_ready(&self) {
        loop {
            let next_due = {
                let mut state = self.state.lock();
                state.promote(Instant::now());
                if !state.ready.is_empty() {
                    return;
                }
                state.next_due()
            };
            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
    }

    /// Takes the highest-priority ready request and marks it in flight.
    fn pop(&self) -> Option<Pending> {
        let mut state = self.state.lock();
        state.promote(Instant::now());
        let pending = state.ready.pop()?;
        state.in_flight = Some(InFlight {
            id: pending.request.id,
            cancelled: false,
        });
        Some(pending)
    }

    /// Resolves the in-flight request.
    fn finish(&self, pending: Pending, result: DeliveryResult) {
        let idle = {
            let mut state = self.state.lock();
            state.in_flight = None;
            state.is_idle()
        };
        pending.resolve(result);
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Puts the in-flight request back for another attempt after `delay`,
    /// unless its ticket was cancelled meanwhile.
    fn retry(&self, mut pending: Pending, delay: Duration) {
        let mut state = self.state.lock();
        let cancelled = state
            .in_flight
            .take()
            .is_some_and(|f| f.id == pending.request.id && f.cancelled);
        if cancelled || state.closed {
            let idle = state.is_idle();
            drop(state);
            pending.resolve(Err(if cancelled {
                DeliveryError::Cancelled
            } else {
                DeliveryError::Closed
            }));
            if idle {
                self.idle.notify_waiters();
            }
            return;
        }
        pending.request.retry_count += 1;
        pending.ready_at = Instant::now() + delay;
        state.delayed.push(pending);
    }

    /// Cancels a waiting request. Returns `false` if it is not waiting.
    pub(crate) fn cancel(&self, id: RequestId) -> bool {
        let mut state = self.state.lock();
        match state.remove(id) {
            Some(pending) => {
                let idle = state.is_idle();
                drop(state);
                trace!(request = %id, "Outbound request cancelled");
                pending.resolve(Err(DeliveryError::Cancelled));
                if idle {
                    self.idle.notify_waiters();
                }
                true
            }
            None => {
                if let Some(in_flight) = state.in_flight.as_mut().filter(|f| f.id == id) {
                    in_flight.cancelled = true;
                }
                false
            }
        }
    }

    /// Rejects further enqueues and resolves everything waiting with `Closed`.
    fn close(&self) -> usize {
        let drained: Vec<Pending> = {
            let mut state = self.state.lock();
            state.closed = true;
            let mut drained = std::mem::take(&mut state.ready).into_vec();
            drained.append(&mut state.delayed);
            drained
        };
        let count = drained.len();
        for pending in drained {
            pending.resolve(Err(DeliveryError::Closed));
        }
        self.wakeup.notify_one();
        self.idle.notify_waiters();
        count
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// OutboundQueue
// =============================================================================

/// Handle to a bounded priority queue of outbound envelopes.
///
/// Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

impl OutboundQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                wakeup: Notify::new(),
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Queues `envelope` for sending as soon as its priority allows.
    ///
    /// Never waits: fails with [`QueueError::QueueFull`] at capacity.
    pub fn enqueue(&self, envelope: Envelope, priority: i32) -> QueueResult<Ticket> {
        self.enqueue_at(envelope, priority, Instant::now())
    }

    /// Queues `envelope` to become ready only after `delay`.
    ///
    /// The request counts against capacity while it waits.
    pub fn enqueue_delayed(
        &self,
        envelope: Envelope,
        priority: i32,
        delay: Duration,
    ) -> QueueResult<Ticket> {
        self.enqueue_at(envelope, priority, Instant::now() + delay)
    }

    fn enqueue_at(&self, envelope: Envelope, priority: i32, ready_at: Instant) -> QueueResult<Ticket> {
        let (reply, rx) = oneshot::channel();
        let id = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let capacity = self.inner.config.capacity;
            if state.waiting() >= capacity {
                return Err(QueueError::QueueFull { capacity });
            }

            state.next_id += 1;
            let id = RequestId(state.next_id);
            let now = Instant::now();
            let pending = Pending {
                request: OutboundRequest {
                    id,
                    envelope,
                    priority,
                    enqueued_at: now,
                    retry_count: 0,
                },
                ready_at,
                reply,
            };
            if ready_at <= now {
                state.ready.push(pending);
            } else {
                state.delayed.push(pending);
            }
            id
        };
        self.inner.wakeup.notify_one();
        trace!(request = %id, priority, "Outbound request queued");

        Ok(Ticket::new(id, rx, Arc::downgrade(&self.inner)))
    }

    /// Number of requests waiting (ready or delayed), excluding the one in flight.
    pub fn len(&self) -> usize {
        self.inner.state.lock().waiting()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("config", &self.inner.config)
            .field("waiting", &self.len())
            .finish()
    }
}
