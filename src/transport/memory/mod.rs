// src/transport/memory/mod.rs

//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait, paired with a [`MemoryPeer`] that plays the remote side.
//! It is intended for tests, demos, and as the reference for transport
//! semantics.
//!
//! ## Reference Semantics
//!
//! - `send()` fails with a transport error unless a connection is open.
//! - Frames delivered by the peer arrive in the inbox of the connection that
//!   is open at the time, in the order the peer delivered them.
//! - Dropping the connection from the peer side closes the inbox, optionally
//!   after a lifecycle frame carrying an error.
//!
//! ## Non-Goals
//!
//! This transport does not emulate network latency, partial writes, or any
//! specific wire protocol. Frames cross as typed values, never bytes.

mod transport;

pub use transport::{create_memory_transport, MemoryPeer};
