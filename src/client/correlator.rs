use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use super::operation::{CancelHandle, Operation};
use super::pending::PendingRequests;
use crate::protocol::{RequestFrame, ResponseFrame};
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    CorrelationId,
    Result,
    RpcError,
    TransportPtr,
};

/// Request/response correlation over a shared transport.
///
/// Every call to [`request`](Self::request) gets a fresh [`CorrelationId`],
/// a pending entry, and an [`Operation`] handle. Inbound responses are matched
/// purely by identifier, so any number of requests can be in flight and
/// responses may arrive in any order.
///
/// Cloning is cheap; clones share the same pending set.
#[derive(Clone)]
pub struct RequestCorrelator {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    pending: Arc<Mutex<PendingRequests>>,

    // Unmatched-response accounting.
    unmatched_total: AtomicU64,
    unmatched_streak: AtomicU32,
}

impl RequestCorrelator {
    // ---

    /// Create a correlator that sends through `transport`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            inner: Arc::new(Inner {
                transport,
                pending: Arc::new(Mutex::new(PendingRequests::new())),
                unmatched_total: AtomicU64::new(0),
                unmatched_streak: AtomicU32::new(0),
            }),
        }
    }

    /// Issue `command` with `payload` and return its operation handle.
    ///
    /// The pending entry is registered before the frame is handed to the
    /// transport, so a response can never outrun its registration.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] if the transport refuses the frame
    /// (typically because the connection is not open), or if the correlator
    /// has been closed by [`abort_all`](Self::abort_all) and not reopened
    /// since. No entry is left pending in either case.
    pub async fn request(&self, command: &str, payload: Value) -> Result<Operation> {
        // ---
        let id = CorrelationId::generate();
        let command: Arc<str> = Arc::from(command);

        let rx = lock_ignore_poison(&self.inner.pending)
            .register(id.clone(), command.clone())
            .ok_or_else(|| RpcError::Transport("connection closed".into()))?;
        let cancel = CancelHandle::new(id.clone(), Arc::downgrade(&self.inner.pending));
        // If this future is dropped mid-send, dropping `operation` clears the entry.
        let operation = Operation::new(command.clone(), rx, cancel);

        let frame = RequestFrame {
            id: id.clone(),
            command,
            payload,
        };

        if let Err(err) = self.inner.transport.send(frame).await {
            log_debug!("send failed for {} ({}): {}", id, operation.command(), err);
            lock_ignore_poison(&self.inner.pending).take(&id);
            return Err(err);
        }

        log_debug!("sent {} ({})", id, operation.command());
        Ok(operation)
    }

    /// Serialize `payload` and issue `command` with it.
    pub async fn request_json<T>(&self, command: &str, payload: &T) -> Result<Operation>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        self.request(command, payload).await
    }

    /// Settle the operation matching `frame.id`.
    ///
    /// Returns `false` and drops the frame when nothing matches: an unknown
    /// identifier, a duplicate, or a late answer to a cancelled request.
    /// Unmatched frames never touch any other operation.
    ///
    /// Normally called by the [`ConnectionManager`](crate::ConnectionManager)
    /// dispatch loop.
    pub fn resolve(&self, frame: ResponseFrame) -> bool {
        // ---
        let ResponseFrame { id, outcome } = frame;
        let entry = lock_ignore_poison(&self.inner.pending).take(&id);

        match entry {
            Some(entry) => {
                self.inner.unmatched_streak.store(0, Ordering::Relaxed);
                log_debug!("response for {} ({})", id, entry.command());
                entry.settle(outcome.map_err(RpcError::Remote));
                true
            }
            None => {
                self.inner.unmatched_total.fetch_add(1, Ordering::Relaxed);
                self.inner.unmatched_streak.fetch_add(1, Ordering::Relaxed);
                log_debug!("dropping response for unknown correlation id {}", id);
                false
            }
        }
    }

    /// Reject every pending operation with [`RpcError::ConnectionLost`] and
    /// refuse new requests until [`reopen`](Self::reopen).
    ///
    /// Both happen under one lock, so a request racing the teardown is
    /// either swept here or refused. Returns how many operations were
    /// rejected. Called on every transition that ends a connection.
    pub fn abort_all(&self, reason: &str) -> usize {
        // ---
        let drained = lock_ignore_poison(&self.inner.pending).close();
        let count = drained.len();

        for (id, entry) in drained {
            log_debug!("aborting {} ({}): {}", id, entry.command(), reason);
            entry.settle(Err(RpcError::ConnectionLost(reason.to_string())));
        }
        self.inner.unmatched_streak.store(0, Ordering::Relaxed);
        count
    }

    /// Accept new requests again after [`abort_all`](Self::abort_all).
    ///
    /// Called when a connection is established.
    pub fn reopen(&self) {
        lock_ignore_poison(&self.inner.pending).open();
    }

    /// Number of operations currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Total number of unmatched responses dropped so far.
    pub fn unmatched_count(&self) -> u64 {
        self.inner.unmatched_total.load(Ordering::Relaxed)
    }

    /// Unmatched responses received since the last matched one.
    pub fn unmatched_streak(&self) -> u32 {
        self.inner.unmatched_streak.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = lock_ignore_poison(&self.inner.pending);
        f.debug_struct("RequestCorrelator")
            .field("pending", &pending.len())
            .field("accepting", &pending.is_open())
            .finish()
    }
}
