// src/transport/memory/transport.rs

//! In-memory transport and its remote-side test peer.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::RemoteError;
use crate::protocol::{InboundFrame, LifecycleFrame, PushedEvent, RequestFrame, ResponseFrame};
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    CorrelationId,
    InboundHandle,
    Result,
    RpcError,
    Transport,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

/// State shared between the transport and its peer.
struct Link {
    // ---
    /// Sender into the inbox of the currently open connection.
    open: Option<mpsc::Sender<InboundFrame>>,

    /// When set, `connect()` fails with this reason.
    refuse: Option<String>,

    /// Number of successful `connect()` calls.
    connects: u32,
}

/// In-memory transport.
///
/// Outbound requests are forwarded to the paired [`MemoryPeer`]; inbound
/// frames are whatever the peer chooses to deliver.
struct MemoryTransport {
    // ---
    link: Arc<Mutex<Link>>,
    to_peer: mpsc::UnboundedSender<RequestFrame>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---

    async fn connect(&self) -> Result<InboundHandle> {
        // ---
        let mut link = lock_ignore_poison(&self.link);
        if let Some(reason) = &link.refuse {
            return Err(RpcError::Transport(format!("connection refused: {reason}")));
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        // Replacing the sender closes any previous connection's inbox.
        link.open = Some(tx);
        link.connects += 1;
        log_debug!("memory transport connected (connect #{})", link.connects);

        Ok(InboundHandle { inbox: rx })
    }

    async fn send(&self, frame: RequestFrame) -> Result<()> {
        // ---
        if lock_ignore_poison(&self.link).open.is_none() {
            return Err(RpcError::Transport("connection not open".into()));
        }

        self.to_peer
            .send(frame)
            .map_err(|_| RpcError::Transport("memory peer dropped".into()))
    }

    async fn close(&self) -> Result<()> {
        // ---
        if lock_ignore_poison(&self.link).open.take().is_some() {
            log_debug!("memory transport closed");
        }
        Ok(())
    }
}

/// Remote side of an in-memory transport.
///
/// The peer sees every request the client sends and decides what comes back:
/// responses, pushed events, lifecycle frames, or a dropped connection.
pub struct MemoryPeer {
    // ---
    link: Arc<Mutex<Link>>,
    from_client: mpsc::UnboundedReceiver<RequestFrame>,
}

impl MemoryPeer {
    // ---

    /// Wait for the next request sent by the client.
    ///
    /// Returns `None` once the transport has been dropped.
    pub async fn next_request(&mut self) -> Option<RequestFrame> {
        self.from_client.recv().await
    }

    /// Return the next request if one has already been sent.
    pub fn try_next_request(&mut self) -> Option<RequestFrame> {
        self.from_client.try_recv().ok()
    }

    /// Deliver an arbitrary frame to the open connection.
    ///
    /// Returns `false` if no connection is open.
    pub async fn deliver(&self, frame: InboundFrame) -> bool {
        // ---
        let sender = lock_ignore_poison(&self.link).open.clone();
        match sender {
            Some(sender) => sender.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Answer request `id` with a successful result.
    pub async fn respond(&self, id: &CorrelationId, result: Value) -> bool {
        self.deliver(InboundFrame::Response(ResponseFrame::ok(id.clone(), result)))
            .await
    }

    /// Answer request `id` with an error object.
    pub async fn respond_error(&self, id: &CorrelationId, error: RemoteError) -> bool {
        self.deliver(InboundFrame::Response(ResponseFrame::err(id.clone(), error)))
            .await
    }

    /// Push an out-of-band event.
    pub async fn push_event(&self, event: PushedEvent) -> bool {
        self.deliver(InboundFrame::Event(event)).await
    }

    /// Drop the open connection.
    ///
    /// With `error`, a lifecycle frame carrying it is delivered first. The
    /// inbox is then closed either way.
    pub async fn drop_connection(&self, error: Option<&str>) {
        // ---
        let sender = lock_ignore_poison(&self.link).open.take();
        if let (Some(sender), Some(error)) = (sender, error) {
            let frame = InboundFrame::Lifecycle(LifecycleFrame {
                connected: false,
                error: Some(error.to_string()),
            });
            let _ = sender.send(frame).await;
        }
    }

    /// Make subsequent `connect()` calls fail (`Some`) or succeed (`None`).
    pub fn refuse_connections(&self, reason: Option<&str>) {
        lock_ignore_poison(&self.link).refuse = reason.map(str::to_string);
    }

    /// True while the client side holds an open connection.
    pub fn is_connected(&self) -> bool {
        lock_ignore_poison(&self.link).open.is_some()
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> u32 {
        lock_ignore_poison(&self.link).connects
    }
}

/// Create an in-memory transport and the peer that drives its remote side.
pub fn create_memory_transport() -> (TransportPtr, MemoryPeer) {
    // ---
    let link = Arc::new(Mutex::new(Link {
        open: None,
        refuse: None,
        connects: 0,
    }));
    let (to_peer, from_client) = mpsc::unbounded_channel();

    let transport = MemoryTransport {
        link: link.clone(),
        to_peer,
    };
    let peer = MemoryPeer { link, from_client };

    (Arc::new(transport), peer)
}
