//! Isolated, deadline-bound execution of handler futures.
//!
//! Both the event bus and the command router run user code through
//! [`run_guarded`]. The future is spawned onto its own task so that a panic
//! stays inside it, raced against a deadline, and tied to a cancellation token.
//! Whatever happens, the caller gets back a terminal [`HandlerOutcome`].

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::error::{BoxError, HandlerFault};

/// Terminal result of one guarded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler ran to completion and returned `Ok`.
    Completed,
    /// The invocation was cancelled through its token before finishing,
    /// e.g. because its subscription was removed.
    Cancelled,
    /// The handler failed, panicked or timed out.
    Faulted(HandlerFault),
}

impl HandlerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns the fault, if any.
    pub fn fault(&self) -> Option<&HandlerFault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Runs `future` on its own task, bounded by `deadline` and `cancel`.
///
/// - A panic inside the future is caught and reported as [`HandlerFault::Panic`].
/// - If `deadline` elapses the task is aborted (best-effort: it stops at its
///   next suspension point) and the outcome is [`HandlerFault::Timeout`],
///   whether or not the abort has taken effect yet.
/// - Once `cancel` fires the future is never polled again. A token that is
///   already cancelled means the future is never polled at all.
///
/// Dropping the returned future aborts the spawned task.
pub async fn run_guarded<F>(future: F, deadline: Duration, cancel: CancellationToken) -> HandlerOutcome
where
    F: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let mut task = AbortOnDropHandle::new(tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = future => Some(result),
        }
    }));

    match tokio::time::timeout(deadline, &mut task).await {
        Ok(Ok(Some(Ok(())))) => HandlerOutcome::Completed,
        Ok(Ok(Some(Err(e)))) => HandlerOutcome::Faulted(HandlerFault::Error(e.to_string())),
        Ok(Ok(None)) => HandlerOutcome::Cancelled,
        Ok(Err(join_err)) if join_err.is_panic() => {
            HandlerOutcome::Faulted(HandlerFault::Panic(panic_message(join_err.into_panic())))
        }
        Ok(Err(_)) => HandlerOutcome::Cancelled,
        Err(_) => {
            task.abort();
            HandlerOutcome::Faulted(HandlerFault::Timeout(deadline))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
