//! Frame types exchanged with the transport and their JSON wire encoding.
//!
//! Structured transports (such as the in-memory one) carry these types
//! directly; byte-oriented transports run them through [`codec`].

pub mod codec;
mod frame;

pub use frame::{InboundFrame, LifecycleFrame, PushedEvent, RequestFrame, ResponseFrame};
