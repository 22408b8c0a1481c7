//! Domain layer public interface.
//!
//! Defines the abstract "send a frame, receive frames" substrate the
//! correlation and connection layers are written against. It is independent
//! of any concrete socket, stream, or broker.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod transport;

pub use transport::{InboundHandle, Transport, TransportPtr};
