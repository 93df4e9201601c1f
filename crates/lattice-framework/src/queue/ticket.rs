use std::sync::Weak;

use tokio::sync::oneshot;

use super::{DeliveryResult, Inner, RequestId};
use crate::error::DeliveryError;

/// Receipt for an enqueued request.
///
/// Await [`wait`](Ticket::wait) for the delivery outcome, or
/// [`cancel`](Ticket::cancel) the request while it is still waiting. Dropping
/// the ticket does not cancel the request.
#[derive(Debug)]
pub struct Ticket {
    id: RequestId,
    rx: oneshot::Receiver<DeliveryResult>,
    queue: Weak<Inner>,
}

impl Ticket {
    pub(crate) fn new(id: RequestId, rx: oneshot::Receiver<DeliveryResult>, queue: Weak<Inner>) -> Self {
        Self { id, rx, queue }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancels the request if it has not been handed to the connection yet.
    ///
    /// Returns `true` if the request was withdrawn; the ticket then resolves
    /// with [`DeliveryError::Cancelled`]. Once sending has begun this returns
    /// `false` and only prevents further retries.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|inner| inner.cancel(self.id))
    }

    /// Waits for the request to be delivered or to fail for good.
    pub async fn wait(self) -> DeliveryResult {
        self.rx.await.unwrap_or(Err(DeliveryError::Closed))
    }
}
