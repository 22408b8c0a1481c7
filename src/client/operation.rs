use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use super::pending::{Outcome, PendingRequests};
use crate::sync::lock_ignore_poison;
use crate::{log_debug, CorrelationId, Result, RpcError};

/// Cancels one pending operation.
///
/// Obtained from [`Operation::cancel_handle`]. It is cheap to clone and can
/// be moved to another task, so the code that decides to abort a request
/// does not need to own the future that awaits it.
#[derive(Clone)]
pub struct CancelHandle {
    // ---
    id: CorrelationId,
    pending: Weak<Mutex<PendingRequests>>,
}

impl CancelHandle {
    // ---

    pub(crate) fn new(id: CorrelationId, pending: Weak<Mutex<PendingRequests>>) -> Self {
        Self { id, pending }
    }

    /// Correlation identifier of the operation this handle cancels.
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Cancel the operation with `reason`.
    ///
    /// If the operation is still pending it is removed and settles right away
    /// with [`RpcError::Cancelled`]. Otherwise this is a no-op. Returns whether
    /// this call did the cancelling.
    ///
    /// A response already in flight is not suppressed; when it arrives it no
    /// longer matches anything and is dropped.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        // ---
        let Some(pending) = self.pending.upgrade() else {
            return false;
        };

        let entry = lock_ignore_poison(&pending).take(&self.id);
        match entry {
            Some(entry) => {
                let reason = reason.into();
                log_debug!("cancelled {} ({}): {}", self.id, entry.command(), reason);
                entry.settle(Err(RpcError::Cancelled { reason }));
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").field("id", &self.id).finish()
    }
}

/// Handle to one in-flight request.
///
/// An `Operation` is a future that resolves exactly once, with the response
/// result, the peer's error, a cancellation, or a connection loss, whichever
/// happens first. Cancellation is a separate capability exposed through
/// [`cancel`](Self::cancel) and [`CancelHandle`].
///
/// Dropping an unfinished `Operation` cancels it.
///
/// # Example
///
/// ```no_run
/// # async fn example(manager: mux_rpc::ConnectionManager) -> mux_rpc::Result<()> {
/// let op = manager.request("ping", serde_json::json!({})).await?;
/// let abort = op.cancel_handle();
///
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
///     abort.cancel("user abort");
/// });
///
/// match op.await {
///     Ok(result) => println!("result: {result}"),
///     Err(err) if err.is_cancelled() => println!("gave up"),
///     Err(err) => return Err(err),
/// }
/// # Ok(())
/// # }
/// ```
pub struct Operation {
    // ---
    command: Arc<str>,
    rx: oneshot::Receiver<Outcome>,
    cancel: CancelHandle,
}

impl Operation {
    // ---

    pub(crate) fn new(command: Arc<str>, rx: oneshot::Receiver<Outcome>, cancel: CancelHandle) -> Self {
        Self { command, rx, cancel }
    }

    /// Correlation identifier assigned to this request.
    pub fn id(&self) -> &CorrelationId {
        self.cancel.id()
    }

    /// Command name the request was issued with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// A detachable handle that can cancel this operation.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel this operation; see [`CancelHandle::cancel`].
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.cancel.cancel(reason)
    }

    /// Await the result and deserialize it into `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        // ---
        let value = self.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Await the result for at most `duration`.
    ///
    /// On expiry the operation is cancelled with reason `"request timed out"`
    /// and [`RpcError::Timeout`] is returned. If the operation settled in the
    /// same instant the timer fired, its real outcome wins.
    pub async fn timeout(mut self, duration: Duration) -> Result<Value> {
        // ---
        match tokio::time::timeout(duration, &mut self).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if self.cancel("request timed out") {
                    Err(RpcError::Timeout)
                } else {
                    (&mut self).await
                }
            }
        }
    }
}

impl Future for Operation {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // ---
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped unsettled: the correlator itself is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::ConnectionLost(
                "request correlator dropped".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        // No-op when already settled.
        self.cancel.cancel("operation dropped");
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", self.id())
            .field("command", &self.command)
            .finish()
    }
}
