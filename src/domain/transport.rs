// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! The transport is responsible only for moving frames: outbound
//! [`RequestFrame`]s to the peer and inbound [`InboundFrame`]s back.
//! Correlation, cancellation, fan-out, and reconnection policy are all
//! handled above it by [`RequestCorrelator`](crate::RequestCorrelator) and
//! [`ConnectionManager`](crate::ConnectionManager).
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{InboundFrame, RequestFrame};
use crate::Result;

/// Inbound side of one connection session.
///
/// The transport pushes every frame it receives into `inbox`. When the
/// connection ends, for whatever reason, the transport drops its sender and
/// `recv()` returns `None`. A transport may also report the end explicitly
/// with an [`InboundFrame::Lifecycle`] frame first, to attach an error.
pub struct InboundHandle {
    // ---
    pub inbox: mpsc::Receiver<InboundFrame>,
}

/// Transport abstraction.
///
/// Implementations must ensure that:
/// - `send()` fails with [`RpcError::Transport`](crate::RpcError::Transport)
///   whenever no connection is open.
/// - Frames received on a connection are delivered to the inbox returned by
///   the `connect()` call that opened it, and to no other inbox.
/// - `close()` is idempotent.
///
/// No ordering between outbound requests and inbound responses is assumed.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. This is an implementation detail; consumers
/// should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Open a connection and return the inbox for its inbound frames.
    ///
    /// Calling `connect()` while a previous connection is open replaces it;
    /// the previous inbox is closed.
    async fn connect(&self) -> Result<InboundHandle>;

    /// Hand one request frame to the peer.
    async fn send(&self, frame: RequestFrame) -> Result<()>;

    /// Close the current connection, if any, and release its resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
pub type TransportPtr = Arc<dyn Transport>;
