use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{CorrelationId, Result};

/// Completion sent to the task awaiting an [`Operation`](super::Operation).
pub(crate) type Outcome = Result<Value>;

/// One request that has been sent but not yet settled.
pub(crate) struct PendingEntry {
    // ---
    command: Arc<str>,
    tx: oneshot::Sender<Outcome>,
}

impl PendingEntry {
    // ---

    pub(crate) fn command(&self) -> &str {
        &self.command
    }

    /// Deliver the outcome; ignored if the awaiting side is gone.
    pub(crate) fn settle(self, outcome: Outcome) {
        let _ = self.tx.send(outcome);
    }
}

/// Tracks pending requests waiting for responses.
///
/// Every removal goes through [`take`](Self::take) or
/// [`close`](Self::close), and callers settle the entry only after removing
/// it. Whichever of response, cancellation, or teardown removes an entry
/// first is the only one that completes it.
///
/// `close` also stops new registrations until [`open`](Self::open), so a
/// request racing a teardown is refused instead of outliving it.
pub(crate) struct PendingRequests {
    // ---
    requests: HashMap<CorrelationId, PendingEntry>,
    accepting: bool,
}

impl PendingRequests {
    // ---

    pub(crate) fn new() -> Self {
        // ---
        Self {
            requests: HashMap::new(),
            accepting: true,
        }
    }

    /// Register a new pending request.
    ///
    /// Returns the receiver that completes when the entry is settled, or
    /// `None` while the set is closed.
    pub(crate) fn register(
        &mut self,
        correlation_id: CorrelationId,
        command: Arc<str>,
    ) -> Option<oneshot::Receiver<Outcome>> {
        // ---
        if !self.accepting {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.requests.insert(correlation_id, PendingEntry { command, tx });
        Some(rx)
    }

    /// Remove the entry for `correlation_id`, if it is still pending.
    pub(crate) fn take(&mut self, correlation_id: &CorrelationId) -> Option<PendingEntry> {
        self.requests.remove(correlation_id)
    }

    /// Refuse further registrations and remove every pending entry.
    pub(crate) fn close(&mut self) -> Vec<(CorrelationId, PendingEntry)> {
        self.accepting = false;
        self.requests.drain().collect()
    }

    /// Accept registrations again.
    pub(crate) fn open(&mut self) {
        self.accepting = true;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.accepting
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }
}
