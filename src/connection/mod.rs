//! Connection lifecycle and inbound demultiplexing.

mod manager;
mod state;

pub use manager::ConnectionManager;
pub use state::{ConnectionEvent, ConnectionState};
