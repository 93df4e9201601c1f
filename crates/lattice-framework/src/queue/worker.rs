//! The single consumer that drains an [`OutboundQueue`] into a connection.

use std::sync::Arc;
use std::time::Duration;

use lattice_core::{BoxedConnection, SendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, info, span, warn};

use super::{Inner, OutboundQueue, TokenBucket};
use crate::error::{DeliveryError, DeliveryFailed, QueueError, QueueResult};

impl OutboundQueue {
    /// Starts the queue's consumer on the current tokio runtime.
    ///
    /// A queue has at most one consumer; a second call fails with
    /// [`QueueError::WorkerRunning`].
    pub fn spawn(&self, connection: BoxedConnection) -> QueueResult<QueueWorker> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.worker_attached {
                return Err(QueueError::WorkerRunning);
            }
            state.worker_attached = true;
        }

        let shutdown = CancellationToken::new();
        let span = span!(Level::INFO, "outbound_worker");
        let task = tokio::spawn(
            consume(Arc::clone(&self.inner), connection, shutdown.clone()).instrument(span),
        );
        Ok(QueueWorker {
            queue: self.clone(),
            shutdown,
            task,
        })
    }
}

/// Handle to a running queue consumer.
#[derive(Debug)]
pub struct QueueWorker {
    queue: OutboundQueue,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl QueueWorker {
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the consumer and closes the queue.
    ///
    /// A send already in progress completes first. Requests still waiting
    /// resolve with [`DeliveryError::Closed`]; returns how many there were.
    pub async fn shutdown(self) -> usize {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Outbound worker ended abnormally");
        }
        let abandoned = self.queue.inner.close();
        if abandoned > 0 {
            warn!(abandoned, "Outbound queue closed with pending requests");
        }
        abandoned
    }

    /// Lets the consumer empty the queue for at most `timeout`, then shuts down.
    pub async fn drain(self, timeout: Duration) -> usize {
        if tokio::time::timeout(timeout, self.queue.inner.wait_idle())
            .await
            .is_err()
        {
            warn!(?timeout, "Outbound queue not drained in time");
        }
        self.shutdown().await
    }
}

async fn consume(inner: Arc<Inner>, connection: BoxedConnection, shutdown: CancellationToken) {
    let config = inner.config.clone();
    let mut bucket = TokenBucket::new(config.rate, config.per, config.burst);
    info!(
        capacity = config.capacity,
        rate = config.rate,
        per = ?config.per,
        "Outbound worker started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = inner.wait_ready() => {}
        }
        // Pop only after the token is granted, so requests arriving during the
        // wait still compete on priority.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = bucket.acquire() => {}
        }
        let Some(pending) = inner.pop() else {
            continue;
        };

        let request = &pending.request;
        debug!(
            request = %request.id,
            kind = %request.envelope.kind,
            priority = request.priority,
            attempt = request.retry_count + 1,
            "Sending outbound request"
        );

        match connection.send(&request.envelope).await {
            Ok(ack) => inner.finish(pending, Ok(ack)),
            Err(SendError::Fatal(reason)) => {
                warn!(request = %request.id, %reason, "Outbound request failed fatally");
                inner.finish(pending, Err(DeliveryError::Fatal(reason)));
            }
            Err(SendError::Transient(reason)) => {
                let retries = request.retry_count;
                if retries < config.retry.max_retries {
                    let delay = config.retry.delay_for(retries + 1);
                    debug!(request = %request.id, %reason, ?delay, "Transient send failure, retrying");
                    inner.retry(pending, delay);
                } else {
                    warn!(
                        request = %request.id,
                        %reason,
                        attempts = retries + 1,
                        "Outbound request failed, retries exhausted"
                    );
                    inner.finish(
                        pending,
                        Err(DeliveryError::Failed(DeliveryFailed {
                            attempts: retries + 1,
                            reason,
                        })),
                    );
                }
            }
        }
    }

    inner.state.lock().worker_attached = false;
    info!("Outbound worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueConfig;
    use async_trait::async_trait;
    use lattice_core::{Ack, Connection, Envelope, SendResult};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    /// Records every send; answers from a script, then succeeds.
    #[derive(Default)]
    struct ScriptedConnection {
        script: Mutex<VecDeque<SendError>>,
        sent: Mutex<Vec<(Instant, Envelope)>>,
    }

    impl ScriptedConnection {
        fn failing(errors: impl IntoIterator<Item = SendError>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(errors.into_iter().collect()),
                ..Default::default()
            })
        }

        fn sent_numbers(&self) -> Vec<u64> {
            self.sent
                .lock()
                .iter()
                .filter_map(|(_, e)| e.payload["n"].as_u64())
                .collect()
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&self, envelope: &Envelope) -> SendResult<Ack> {
            self.sent.lock().push((Instant::now(), envelope.clone()));
            match self.script.lock().pop_front() {
                Some(err) => Err(err),
                None => Ok(Ack::default()),
            }
        }

        async fn receive(&self) -> Option<Envelope> {
            None
        }
    }

    fn envelope(n: u64) -> Envelope {
        Envelope::new("send_private_msg", json!({ "n": n }))
    }

    fn unlimited() -> QueueConfig {
        QueueConfig {
            rate: 0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spreads_delivery() {
        const RATE: u64 = 4;
        let queue = OutboundQueue::new(QueueConfig {
            rate: RATE as u32,
            per: Duration::from_secs(1),
            burst: 1,
            ..Default::default()
        });
        let conn = ScriptedConnection::failing([]);
        let tickets: Vec<_> = (0..3 * RATE)
            .map(|n| queue.enqueue(envelope(n), 0).unwrap())
            .collect();

        let start = Instant::now();
        let worker = queue.spawn(conn.clone()).unwrap();
        for ticket in tickets {
            assert_ok!(ticket.wait().await);
        }

        let sent = conn.sent.lock().clone();
        let last = sent.last().unwrap().0;
        let interval = Duration::from_millis(1000 / RATE);
        // 3*RATE sends take 3s minus one interval: the full bucket pays for
        // the first send, the other 3*RATE - 1 each wait one interval.
        let expected = interval * (3 * RATE as u32 - 1);
        assert_eq!(expected, Duration::from_secs(3) - interval);
        assert!(last - start >= expected);
        assert!(last - start < Duration::from_secs(3));
        for pair in sent.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= interval - Duration::from_millis(1));
        }
        assert_eq!(conn.sent_numbers(), (0..3 * RATE).collect::<Vec<_>>());
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_accepts_after_consumption() {
        let queue = OutboundQueue::new(QueueConfig {
            capacity: 3,
            rate: 1,
            per: Duration::from_secs(1),
            ..Default::default()
        });
        let first = queue.enqueue(envelope(1), 0).unwrap();
        let _second = queue.enqueue(envelope(2), 0).unwrap();
        let _third = queue.enqueue(envelope(3), 0).unwrap();
        assert_eq!(
            queue.enqueue(envelope(4), 0).unwrap_err(),
            QueueError::QueueFull { capacity: 3 }
        );

        let worker = queue.spawn(ScriptedConnection::failing([])).unwrap();
        assert_ok!(first.wait().await);
        assert_ok!(queue.enqueue(envelope(4), 0));
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order() {
        let queue = OutboundQueue::new(unlimited());
        let conn = ScriptedConnection::failing([]);
        let tickets = vec![
            queue.enqueue(envelope(1), 0).unwrap(),
            queue.enqueue(envelope(2), 9).unwrap(),
            queue.enqueue(envelope(3), 0).unwrap(),
            queue.enqueue(envelope(4), 9).unwrap(),
        ];
        let worker = queue.spawn(conn.clone()).unwrap();
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }
        assert_eq!(conn.sent_numbers(), vec![2, 4, 1, 3]);
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let queue = OutboundQueue::new(unlimited());
        let conn = ScriptedConnection::failing([
            SendError::Transient("timeout".into()),
            SendError::Transient("timeout".into()),
        ]);
        let start = Instant::now();
        let ticket = queue.enqueue(envelope(1), 0).unwrap();
        let worker = queue.spawn(conn.clone()).unwrap();

        assert_ok!(ticket.wait().await);
        assert_eq!(conn.sent.lock().len(), 3);
        // Default backoff: 2s, then 4s.
        assert!(start.elapsed() >= Duration::from_secs(6));
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let queue = OutboundQueue::new(unlimited());
        let conn = ScriptedConnection::failing(
            std::iter::repeat_with(|| SendError::Transient("gateway busy".into())).take(10),
        );
        let ticket = queue.enqueue(envelope(1), 0).unwrap();
        let worker = queue.spawn(conn.clone()).unwrap();

        assert_eq!(
            ticket.wait().await,
            Err(DeliveryError::Failed(DeliveryFailed {
                attempts: 4,
                reason: "gateway busy".into()
            }))
        );
        assert_eq!(conn.sent.lock().len(), 4);
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let queue = OutboundQueue::new(unlimited());
        let conn = ScriptedConnection::failing([SendError::Fatal("bad envelope".into())]);
        let ticket = queue.enqueue(envelope(1), 0).unwrap();
        let worker = queue.spawn(conn.clone()).unwrap();

        assert_eq!(
            ticket.wait().await,
            Err(DeliveryError::Fatal("bad envelope".into()))
        );
        assert_eq!(conn.sent.lock().len(), 1);
        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_worker_and_shutdown_closes() {
        let queue = OutboundQueue::new(QueueConfig::default());
        let conn = ScriptedConnection::failing([]);
        let parked = queue
            .enqueue_delayed(envelope(1), 0, Duration::from_secs(60))
            .unwrap();

        let worker = queue.spawn(conn.clone()).unwrap();
        assert_eq!(
            queue.spawn(conn.clone()).unwrap_err(),
            QueueError::WorkerRunning
        );

        assert_eq!(worker.shutdown().await, 1);
        assert_eq!(parked.wait().await, Err(DeliveryError::Closed));
        assert!(queue.is_closed());
        assert_eq!(
            queue.enqueue(envelope(2), 0).unwrap_err(),
            QueueError::Closed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_everything_first() {
        let queue = OutboundQueue::new(QueueConfig {
            rate: 10,
            ..Default::default()
        });
        let conn = ScriptedConnection::failing([]);
        for n in 0..5 {
            queue.enqueue(envelope(n), 0).unwrap();
        }
        let worker = queue.spawn(conn.clone()).unwrap();

        assert_eq!(worker.drain(Duration::from_secs(10)).await, 0);
        assert_eq!(conn.sent.lock().len(), 5);
    }
}
