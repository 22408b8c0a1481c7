//! Fan-out primitives.
//!
//! These types let any number of independent observers listen for a signal
//! without the publisher knowing who is listening:
//!
//! - [`Subscribable`]: payload-free signal on a single channel.
//! - [`CountingSubscribable`]: the same, plus a pollable version counter.
//! - [`KeyedSubscribable`]: one lazily created channel per key.
//! - [`EventDispatcher`]: typed events on a single channel.
//!
//! All of them are cheap to clone (clones share state), are safe to use from
//! multiple threads, and share the same fan-out rules: snapshot iteration,
//! subscription-order delivery, and per-subscriber panic isolation.

mod dispatcher;
mod keyed;
mod listeners;
mod subscribable;

pub use dispatcher::EventDispatcher;
pub use keyed::{KeySubscriber, KeyedSubscribable};
pub use listeners::Unsubscriber;
pub use subscribable::{CountingSubscribable, Subscribable};
