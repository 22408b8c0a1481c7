//! Client-side request correlation.
//!
//! [`RequestCorrelator`] turns one multiplexed frame stream into independent,
//! awaitable, cancellable [`Operation`]s.

mod correlator;
mod operation;
mod pending;

pub use correlator::RequestCorrelator;
pub use operation::{CancelHandle, Operation};
