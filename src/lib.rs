//! Client-side RPC multiplexing over a single connection.
//!
//! One connection carries many concurrent requests, their out-of-order
//! responses, and unsolicited events pushed by the peer. This library turns
//! that single stream into:
//!
//! - independent, awaitable, cancellable [`Operation`]s, one per request,
//!   matched to responses by [`CorrelationId`];
//! - fan-out channels ([`Subscribable`], [`KeyedSubscribable`],
//!   [`EventDispatcher`]) for any number of observers;
//! - a [`ConnectionManager`] that owns the lifecycle and guarantees no
//!   operation outlives the connection it was sent on.
//!
//! The connection itself is abstracted behind the [`Transport`] trait. An
//! in-memory implementation ([`create_memory_transport`]) is included for
//! tests and demos.
//!

// Import all sub modules once...
mod macros;
mod sync;

mod builder;
mod client;
mod config;
mod connection;
mod correlation;
mod domain;
mod error;
mod retry;
mod subscribe;
mod transport;

pub mod protocol;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use builder::ConnectionBuilder;
pub use client::{CancelHandle, Operation, RequestCorrelator};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};

pub use config::{ClientConfig, RetryConfig};

pub use correlation::CorrelationId;
pub use error::{RemoteError, Result, RpcError};

pub use protocol::PushedEvent;

pub use transport::{create_memory_transport, MemoryPeer};

// --- public re-exports
pub use domain::{
    //
    InboundHandle,
    Transport,
    TransportPtr,
};

pub use subscribe::{
    //
    CountingSubscribable,
    EventDispatcher,
    KeySubscriber,
    KeyedSubscribable,
    Subscribable,
    Unsubscriber,
};
