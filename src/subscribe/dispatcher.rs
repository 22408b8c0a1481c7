use std::sync::Arc;

use super::listeners::{Listeners, Unsubscriber};

/// Typed fan-out channel.
///
/// `emit()` hands a reference to the event to every current subscriber,
/// synchronously and in subscription order, with the same snapshot semantics
/// as [`Subscribable`](crate::Subscribable). Independent dispatchers never
/// share subscribers, so a consumer of one channel never sees another
/// channel's events.
pub struct EventDispatcher<T> {
    listeners: Listeners<dyn Fn(&T) + Send + Sync>,
}

impl<T: 'static> EventDispatcher<T> {
    // ---

    /// Create a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self {
            listeners: Listeners::new(),
        }
    }

    /// Register `callback` for every future event.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscriber
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.insert(Arc::new(callback))
    }

    /// Deliver `event` to every current subscriber exactly once.
    ///
    /// Returns how many subscribers ran to completion. A panicking subscriber
    /// is logged and does not stop delivery to the rest.
    pub fn emit(&self, event: &T) -> usize {
        self.listeners.fan_out(|callback| callback(event))
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<T: 'static> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EventDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_reaches_all_subscribers_once() {
        // ---
        let dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            let _ = dispatcher.subscribe(move |n: &u32| seen.lock().unwrap().push((tag, *n)));
        }

        assert_eq!(dispatcher.emit(&7), 2);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_dispatchers_are_independent() {
        // ---
        let left: EventDispatcher<&'static str> = EventDispatcher::new();
        let right: EventDispatcher<&'static str> = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _u = left.subscribe(move |e: &&'static str| seen_clone.lock().unwrap().push(*e));

        right.emit(&"right");
        left.emit(&"left");

        assert_eq!(*seen.lock().unwrap(), vec!["left"]);
    }

    #[test]
    fn test_unsubscribed_dispatcher_listener_stops_receiving() {
        // ---
        let dispatcher: EventDispatcher<i32> = EventDispatcher::new();
        let total = Arc::new(Mutex::new(0));

        let total_clone = total.clone();
        let unsub = dispatcher.subscribe(move |n: &i32| *total_clone.lock().unwrap() += n);

        dispatcher.emit(&5);
        unsub.unsubscribe();
        dispatcher.emit(&5);

        assert_eq!(*total.lock().unwrap(), 5);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }
}
