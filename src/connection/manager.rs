//! Connection manager.
//!
//! Owns the transport lifecycle for one connection session and demultiplexes
//! inbound frames:
//!
//! - response frames go to the [`RequestCorrelator`],
//! - pushed events go to the pushed-event [`EventDispatcher`],
//! - lifecycle changes become [`ConnectionEvent`]s on the connection
//!   dispatcher.
//!
//! ## Teardown
//!
//! Whenever a connection ends (`stop()`, a lifecycle frame reporting a drop,
//! the transport closing its inbox, or the unmatched-response limit
//! tripping) every pending operation is rejected with
//! [`RpcError::ConnectionLost`] under the same lock that changes the state.
//! No operation outlives the connection it was sent on.
//!
//! ## Sessions
//!
//! Every `start()` and `stop()` bumps a session counter. Background work
//! (connect attempts, the receive loop) carries the session it belongs to and
//! stops touching shared state as soon as the counter moves on, so a late
//! completion from a previous session can never resurrect state.

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::{ConnectionEvent, ConnectionState};
use crate::protocol::{InboundFrame, LifecycleFrame, PushedEvent};
use crate::retry::retry_with_backoff;
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_info,
    log_warn,
    ClientConfig,
    EventDispatcher,
    InboundHandle,
    Operation,
    RequestCorrelator,
    Result,
    RpcError,
    TransportPtr,
};

/// Owner of one connection session.
///
/// Construct one per session and pass it (or clones of it; clones share
/// everything) to whatever needs to issue requests or observe events.
///
/// # Example
///
/// ```no_run
/// use mux_rpc::{create_memory_transport, ClientConfig, ConnectionManager};
/// use serde_json::json;
///
/// # async fn example() -> mux_rpc::Result<()> {
/// let (transport, _peer) = create_memory_transport();
/// let manager = ConnectionManager::new(transport, ClientConfig::new("ui"));
///
/// let _status = manager.connection_events().subscribe(|event| {
///     println!("connected: {}", event.connected());
/// });
/// let _pushes = manager.pushed_events().subscribe(|event| {
///     println!("pushed: {}", event.event_type);
/// });
///
/// manager.start().await?;
/// let pong = manager.request("ping", json!({})).await?.await?;
/// manager.stop().await?;
/// # let _ = pong;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    config: ClientConfig,
    correlator: RequestCorrelator,
    connection_events: EventDispatcher<ConnectionEvent>,
    pushed_events: EventDispatcher<PushedEvent>,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    // ---
    state: ConnectionState,
    session: u64,
    receive_task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    // ---

    /// Create a manager in the `Disconnected` state.
    pub fn new(transport: TransportPtr, config: ClientConfig) -> Self {
        // ---
        let correlator = RequestCorrelator::new(transport.clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                correlator,
                connection_events: EventDispatcher::new(),
                pushed_events: EventDispatcher::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    session: 0,
                    receive_task: None,
                }),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        lock_ignore_poison(&self.inner.lifecycle).state
    }

    /// Configuration this manager was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The correlator responses are routed to.
    pub fn correlator(&self) -> &RequestCorrelator {
        &self.inner.correlator
    }

    /// Dispatcher for lifecycle transitions.
    pub fn connection_events(&self) -> &EventDispatcher<ConnectionEvent> {
        &self.inner.connection_events
    }

    /// Dispatcher for events pushed by the peer.
    pub fn pushed_events(&self) -> &EventDispatcher<PushedEvent> {
        &self.inner.pushed_events
    }

    /// Issue a request on this connection; see [`RequestCorrelator::request`].
    pub async fn request(&self, command: &str, payload: Value) -> Result<Operation> {
        self.inner.correlator.request(command, payload).await
    }

    /// Serialize `payload` and issue a request; see
    /// [`RequestCorrelator::request_json`].
    pub async fn request_json<T>(&self, command: &str, payload: &T) -> Result<Operation>
    where
        T: Serialize + ?Sized,
    {
        self.inner.correlator.request_json(command, payload).await
    }

    /// Leave `Disconnected` and establish the connection.
    ///
    /// Resolves once the manager is `Connected`, retrying per
    /// [`ClientConfig::reconnect`] if configured.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidState`] if the manager is not `Disconnected`, or
    ///   if `stop()` was called before the connection was established.
    /// - The last connect error once attempts are exhausted; the manager is
    ///   back in `Disconnected` in that case.
    pub async fn start(&self) -> Result<()> {
        // ---
        let (session, event) = {
            let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
            if lifecycle.state != ConnectionState::Disconnected {
                return Err(RpcError::InvalidState(format!(
                    "start() called while {}",
                    lifecycle.state
                )));
            }
            lifecycle.session += 1;
            let event = self
                .inner
                .apply(&mut lifecycle, ConnectionState::Connecting, None);
            (lifecycle.session, event)
        };
        self.inner.connection_events.emit(&event);

        let handle = match self.inner.connect(session).await {
            Ok(handle) => handle,
            Err(err) => {
                self.inner
                    .transition(session, ConnectionState::Disconnected, Some(err.clone()));
                return Err(err);
            }
        };

        if !self
            .inner
            .transition(session, ConnectionState::Connected, None)
        {
            let _ = self.inner.transport.close().await;
            return Err(RpcError::InvalidState(
                "connection stopped while connecting".into(),
            ));
        }

        let task = tokio::spawn(receive_loop(Arc::downgrade(&self.inner), session, handle));

        let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
        if lifecycle.session == session {
            lifecycle.receive_task = Some(task);
        } else {
            task.abort();
        }
        Ok(())
    }

    /// Force an immediate transition to `Disconnected`.
    ///
    /// Every pending operation is rejected with [`RpcError::ConnectionLost`]
    /// and exactly one `connected: false` event is emitted before the
    /// transport is closed. Calling `stop()` while already disconnected is a
    /// no-op.
    pub async fn stop(&self) -> Result<()> {
        // ---
        let (event, task) = {
            let mut lifecycle = lock_ignore_poison(&self.inner.lifecycle);
            if lifecycle.state == ConnectionState::Disconnected {
                return Ok(());
            }
            lifecycle.session += 1;
            let task = lifecycle.receive_task.take();
            let cause = RpcError::ConnectionLost("connection stopped".into());
            let event = self
                .inner
                .apply(&mut lifecycle, ConnectionState::Disconnected, Some(cause));
            (event, task)
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.connection_events.emit(&event);
        self.inner.transport.close().await
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.inner.config.client_id)
            .field("state", &self.state())
            .field("pending", &self.inner.correlator.pending_count())
            .finish()
    }
}

impl Inner {
    // ---

    fn is_current(&self, session: u64) -> bool {
        lock_ignore_poison(&self.lifecycle).session == session
    }

    /// Change state under the lifecycle lock and return the event to emit
    /// once the lock is released.
    ///
    /// Pending operations are swept here, synchronously with the state
    /// change, whenever a connection ends. The sweep also closes the
    /// correlator to new requests until the next `Connected`, so nothing
    /// registered between the sweep and the transport closing can linger.
    fn apply(
        &self,
        lifecycle: &mut Lifecycle,
        next: ConnectionState,
        cause: Option<RpcError>,
    ) -> ConnectionEvent {
        // ---
        let previous = std::mem::replace(&mut lifecycle.state, next);
        let client_id = &self.config.client_id;

        if previous == ConnectionState::Connected || next == ConnectionState::Disconnected {
            let reason = match &cause {
                Some(RpcError::ConnectionLost(reason)) => reason.clone(),
                Some(other) => other.to_string(),
                None => format!("connection {next}"),
            };
            let swept = self.correlator.abort_all(&reason);
            if swept > 0 {
                log_info!("{client_id}: rejected {swept} pending operation(s): {reason}");
            }
        }
        if next == ConnectionState::Disconnected {
            lifecycle.receive_task = None;
        }
        if next == ConnectionState::Connected {
            self.correlator.reopen();
        }

        match &cause {
            Some(err) => log_info!("{client_id}: {previous} -> {next} ({err})"),
            None => log_info!("{client_id}: {previous} -> {next}"),
        }
        ConnectionEvent::new(next, cause)
    }

    /// Transition on behalf of `session`; ignored if that session is over.
    ///
    /// Returns `false` if the session is stale.
    fn transition(&self, session: u64, next: ConnectionState, cause: Option<RpcError>) -> bool {
        // ---
        let event = {
            let mut lifecycle = lock_ignore_poison(&self.lifecycle);
            if lifecycle.session != session {
                log_debug!("{}: ignoring stale transition to {next}", self.config.client_id);
                return false;
            }
            if lifecycle.state == next {
                return true;
            }
            self.apply(&mut lifecycle, next, cause)
        };
        self.connection_events.emit(&event);
        true
    }

    /// Dial the transport, retrying per the reconnect policy.
    async fn connect(&self, session: u64) -> Result<InboundHandle> {
        // ---
        retry_with_backoff(self.config.reconnect.as_ref(), move || async move {
            if !self.is_current(session) {
                return Err(RpcError::InvalidState("connection stopped".into()));
            }
            self.transport.connect().await.inspect_err(|err| {
                log_warn!("{}: connect failed: {err}", self.config.client_id);
            })
        })
        .await
    }

    /// Route one inbound frame.
    ///
    /// Returns the cause when the frame ends the connection.
    fn dispatch(&self, frame: InboundFrame) -> Option<RpcError> {
        // ---
        match frame {
            InboundFrame::Response(response) => {
                if self.correlator.resolve(response) {
                    return None;
                }
                let limit = self.config.unmatched_response_limit?;
                let streak = self.correlator.unmatched_streak();
                if streak < limit {
                    return None;
                }
                log_warn!(
                    "{}: {streak} consecutive unmatched responses, treating stream as corrupted",
                    self.config.client_id
                );
                Some(RpcError::Protocol(format!(
                    "{streak} consecutive unmatched responses"
                )))
            }
            InboundFrame::Event(event) => {
                self.pushed_events.emit(&event);
                None
            }
            InboundFrame::Lifecycle(LifecycleFrame {
                connected: true, ..
            }) => {
                log_debug!("{}: connected lifecycle frame on open connection", self.config.client_id);
                None
            }
            InboundFrame::Lifecycle(LifecycleFrame {
                connected: false,
                error,
            }) => Some(RpcError::ConnectionLost(
                error.unwrap_or_else(|| "peer closed the connection".into()),
            )),
        }
    }

    /// Handle the end of a connection and, if the reconnect policy allows,
    /// return the inbox of a fresh one.
    async fn reconnect(&self, session: u64, cause: RpcError) -> Option<InboundHandle> {
        // ---
        let _ = self.transport.close().await;

        if self.config.reconnect.is_none() {
            self.transition(session, ConnectionState::Disconnected, Some(cause));
            return None;
        }

        if !self.transition(session, ConnectionState::Connecting, Some(cause)) {
            return None;
        }

        match self.connect(session).await {
            Ok(handle) if self.transition(session, ConnectionState::Connected, None) => Some(handle),
            Ok(_) => None,
            Err(err) => {
                self.transition(session, ConnectionState::Disconnected, Some(err));
                None
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // ---
        let lifecycle = match self.lifecycle.get_mut() {
            Ok(lifecycle) => lifecycle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = lifecycle.receive_task.take() {
            task.abort();
        }
    }
}

/// Receive loop for one session.
///
/// Holds only a weak reference between frames so that dropping the last
/// [`ConnectionManager`] ends the loop.
async fn receive_loop(weak: Weak<Inner>, session: u64, mut handle: InboundHandle) {
    // ---
    loop {
        let frame = handle.inbox.recv().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(session) {
            return;
        }

        let cause = match frame {
            Some(frame) => match inner.dispatch(frame) {
                Some(cause) => cause,
                None => continue,
            },
            None => RpcError::ConnectionLost("transport closed".into()),
        };

        match inner.reconnect(session, cause).await {
            Some(next) => handle = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport, MemoryPeer, RetryConfig, Unsubscriber};
    use serde_json::json;
    use std::time::Duration;

    type Recorded = Arc<Mutex<Vec<ConnectionEvent>>>;

    fn manager(config: ClientConfig) -> (ConnectionManager, MemoryPeer) {
        let (transport, peer) = create_memory_transport();
        (ConnectionManager::new(transport, config), peer)
    }

    fn record(manager: &ConnectionManager) -> (Recorded, Unsubscriber) {
        // ---
        let events: Recorded = Arc::default();
        let sink = events.clone();
        let unsub = manager
            .connection_events()
            .subscribe(move |event: &ConnectionEvent| sink.lock().unwrap().push(event.clone()));
        (events, unsub)
    }

    fn states(events: &Recorded) -> Vec<ConnectionState> {
        events.lock().unwrap().iter().map(|e| e.state()).collect()
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        // ---
        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.state() != state {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("state not reached");
    }

    fn fast_reconnect() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            multiplier: 1.0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_start_reaches_connected() {
        // ---
        let (manager, peer) = manager(ClientConfig::new("start"));
        let (events, _unsub) = record(&manager);

        manager.start().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(peer.is_connected());
        assert_eq!(
            states(&events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(events.lock().unwrap().iter().all(|e| e.error().is_none()));
    }

    #[tokio::test]
    async fn test_start_while_started_is_invalid() {
        // ---
        let (manager, _peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidState(_)));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_refused_start_returns_to_disconnected() {
        // ---
        let (manager, peer) = manager(ClientConfig::default());
        let (events, _unsub) = record(&manager);
        peer.refuse_connections(Some("down"));

        let err = manager.start().await.unwrap_err();

        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            states(&events),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );
        assert!(events.lock().unwrap()[1].error().is_some());
    }

    #[tokio::test]
    async fn test_stop_rejects_pending_and_emits_once() {
        // ---
        let (manager, mut peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();
        let (events, _unsub) = record(&manager);

        let first = manager.request("slow", json!({})).await.unwrap();
        let second = manager.request("slower", json!({})).await.unwrap();
        assert!(peer.next_request().await.is_some());

        manager.stop().await.unwrap();
        manager.stop().await.unwrap();

        assert!(first.await.unwrap_err().is_connection_lost());
        assert!(second.await.unwrap_err().is_connection_lost());
        assert_eq!(manager.correlator().pending_count(), 0);
        assert_eq!(states(&events), vec![ConnectionState::Disconnected]);
        assert!(!peer.is_connected());
    }

    /// Subscribe a callback that issues a request as soon as it observes the
    /// connection going down, and collect what that request produced.
    fn request_on_disconnect(manager: &ConnectionManager) -> (Arc<Mutex<Vec<Result<Operation>>>>, Unsubscriber) {
        // ---
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let issuer = manager.clone();
        let unsub = manager.connection_events().subscribe(move |event: &ConnectionEvent| {
            if event.connected() {
                return;
            }
            let outcome = tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(issuer.request("retry", json!({})))
            });
            sink.lock().unwrap().push(outcome);
        });
        (outcomes, unsub)
    }

    async fn assert_settled_or_refused(outcomes: &Arc<Mutex<Vec<Result<Operation>>>>) {
        // ---
        let taken: Vec<_> = outcomes.lock().unwrap().drain(..).collect();
        assert_eq!(taken.len(), 1);
        for outcome in taken {
            match outcome {
                Err(err) => assert!(matches!(err, RpcError::Transport(_)), "{err:?}"),
                Ok(op) => {
                    let settled = tokio::time::timeout(Duration::from_secs(1), op)
                        .await
                        .expect("operation outlived its connection");
                    assert!(settled.unwrap_err().is_connection_lost());
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_issued_during_stop_never_lingers() {
        // ---
        let (manager, _peer) = manager(ClientConfig::new("stop-race"));
        manager.start().await.unwrap();
        let (outcomes, unsub) = request_on_disconnect(&manager);

        manager.stop().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_settled_or_refused(&outcomes).await;
        assert_eq!(manager.correlator().pending_count(), 0);
        unsub.unsubscribe();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_issued_during_peer_drop_never_lingers() {
        // ---
        let (manager, peer) = manager(ClientConfig::new("drop-race"));
        manager.start().await.unwrap();
        let (outcomes, unsub) = request_on_disconnect(&manager);

        peer.drop_connection(Some("reset")).await;
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while outcomes.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscriber never ran");

        assert_settled_or_refused(&outcomes).await;
        assert_eq!(manager.correlator().pending_count(), 0);
        unsub.unsubscribe();
    }

    #[tokio::test]
    async fn test_requests_accepted_again_after_restart() {
        // ---
        let (manager, mut peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();
        manager.stop().await.unwrap();

        let err = manager.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));

        manager.start().await.unwrap();
        let op = manager.request("ping", json!({})).await.unwrap();
        let request = peer.next_request().await.unwrap();
        peer.respond(&request.id, json!("pong")).await;
        assert_eq!(op.await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_peer_drop_rejects_pending_with_reason() {
        // ---
        let (manager, peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();
        let (events, _unsub) = record(&manager);

        let op = manager.request("ping", json!({})).await.unwrap();
        peer.drop_connection(Some("socket reset")).await;

        match op.await {
            Err(RpcError::ConnectionLost(reason)) => assert_eq!(reason, "socket reset"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].connected());
        assert!(recorded[0].error().is_some());
    }

    #[tokio::test]
    async fn test_pushed_events_are_dispatched() {
        // ---
        let (manager, peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _unsub = manager.pushed_events().subscribe(move |event: &PushedEvent| {
            sink.lock().unwrap().push(event.event_type.clone());
        });

        assert!(peer.push_event(PushedEvent::new("tick")).await);
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["tick".to_string()]);
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        // ---
        let config = ClientConfig::new("reconnect").with_reconnect(fast_reconnect());
        let (manager, peer) = manager(config);
        manager.start().await.unwrap();
        let (events, _unsub) = record(&manager);

        let op = manager.request("ping", json!({})).await.unwrap();
        peer.drop_connection(None).await;

        assert!(op.await.unwrap_err().is_connection_lost());
        tokio::time::timeout(Duration::from_secs(1), async {
            while peer.connect_count() < 2 || manager.state() != ConnectionState::Connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            states(&events),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert!(events.lock().unwrap()[0].error().is_some());
    }

    #[tokio::test]
    async fn test_unmatched_limit_tears_connection_down() {
        // ---
        let config = ClientConfig::default().with_unmatched_response_limit(2);
        let (manager, peer) = manager(config);
        manager.start().await.unwrap();
        let (events, _unsub) = record(&manager);

        let op = manager.request("ping", json!({})).await.unwrap();
        peer.respond(&crate::CorrelationId::from("stray-1"), json!(1)).await;
        peer.respond(&crate::CorrelationId::from("stray-2"), json!(2)).await;

        assert!(op.await.unwrap_err().is_connection_lost());
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert!(matches!(
            events.lock().unwrap()[0].error(),
            Some(RpcError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unmatched_responses_are_dropped_without_limit() {
        // ---
        let (manager, mut peer) = manager(ClientConfig::default());
        manager.start().await.unwrap();

        for n in 0..10 {
            peer.respond(&crate::CorrelationId::from(format!("stray-{n}")), json!(n))
                .await;
        }
        let op = manager.request("ping", json!({})).await.unwrap();
        let request = peer.next_request().await.unwrap();
        peer.respond(&request.id, json!("pong")).await;

        assert_eq!(op.await.unwrap(), json!("pong"));
        assert_eq!(manager.correlator().unmatched_count(), 10);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}
