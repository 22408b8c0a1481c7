use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::listeners::{Listeners, Unsubscriber};

type Signal = dyn Fn() + Send + Sync;

/// Single-channel, payload-free notification primitive.
///
/// `notify()` invokes every callback subscribed when the call started, in
/// subscription order. Clones share the same subscriber set.
///
/// # Example
///
/// ```
/// use mux_rpc::Subscribable;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let changed = Subscribable::new();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let h = hits.clone();
/// let unsub = changed.subscribe(move || {
///     h.fetch_add(1, Ordering::SeqCst);
/// });
///
/// changed.notify();
/// unsub.unsubscribe();
/// changed.notify();
///
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Subscribable {
    listeners: Listeners<Signal>,
}

impl Subscribable {
    // ---

    /// Create an empty channel.
    pub fn new() -> Self {
        Self {
            listeners: Listeners::new(),
        }
    }

    /// Register `callback`; the returned handle removes it again.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscriber
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.insert(Arc::new(callback))
    }

    /// Invoke every current subscriber once.
    ///
    /// Returns how many subscribers ran to completion.
    pub fn notify(&self) -> usize {
        self.listeners.fan_out(|callback| callback())
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// True if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl Default for Subscribable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Subscribable {
    /// Two handles are equal when they share one subscriber set.
    fn eq(&self, other: &Self) -> bool {
        self.listeners.same_set(&other.listeners)
    }
}

impl Eq for Subscribable {}

impl std::fmt::Debug for Subscribable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribable")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A [`Subscribable`] that also bumps a version counter on every notify.
///
/// Consumers that would rather poll than register a callback can compare
/// [`version`](Self::version) against the last value they saw. The counter is
/// incremented before subscribers run, so a subscriber reading it observes the
/// version of the notification it is handling.
#[derive(Clone, Default, Debug)]
pub struct CountingSubscribable {
    channel: Subscribable,
    version: Arc<AtomicU64>,
}

impl CountingSubscribable {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Unsubscriber
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.channel.subscribe(callback)
    }

    /// Increment the version, then notify every current subscriber.
    pub fn notify(&self) -> usize {
        // ---
        self.version.fetch_add(1, Ordering::AcqRel);
        self.channel.notify()
    }

    /// Number of `notify()` calls made so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.channel.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn Fn() + Send + Sync>) {
        // ---
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &'static str| {
            let log = log_clone.clone();
            Box::new(move || log.lock().unwrap().push(name)) as Box<dyn Fn() + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_notify_invokes_in_subscription_order() {
        // ---
        let channel = Subscribable::new();
        let (log, make) = recorder();

        let _a = channel.subscribe(make("a"));
        let _b = channel.subscribe(make("b"));
        let _c = channel.subscribe(make("c"));

        assert_eq!(channel.notify(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        // ---
        let channel = Subscribable::new();
        let unsub = channel.subscribe(|| {});

        assert!(unsub.unsubscribe());
        assert!(!unsub.unsubscribe());
        assert!(channel.is_empty());
        assert_eq!(channel.notify(), 0);
    }

    #[test]
    fn test_self_unsubscribe_during_notify() {
        // ---
        let channel = Subscribable::new();
        let (log, make) = recorder();

        let slot: Arc<Mutex<Option<Unsubscriber>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let log_clone = log.clone();
        let unsub = channel.subscribe(move || {
            log_clone.lock().unwrap().push("once");
            if let Some(u) = slot_clone.lock().unwrap().as_ref() {
                u.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(unsub);
        let _after = channel.subscribe(make("after"));

        channel.notify();
        channel.notify();

        assert_eq!(*log.lock().unwrap(), vec!["once", "after", "after"]);
    }

    #[test]
    fn test_removed_mid_pass_is_not_invoked() {
        // ---
        let channel = Subscribable::new();
        let (log, make) = recorder();

        let victim: Arc<Mutex<Option<Unsubscriber>>> = Arc::new(Mutex::new(None));
        let victim_clone = victim.clone();
        let _first = channel.subscribe(move || {
            if let Some(u) = victim_clone.lock().unwrap().as_ref() {
                u.unsubscribe();
            }
        });
        *victim.lock().unwrap() = Some(channel.subscribe(make("victim")));

        assert_eq!(channel.notify(), 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_added_during_notify_waits_for_next_pass() {
        // ---
        let channel = Subscribable::new();
        let (log, make) = recorder();

        let channel_clone = channel.clone();
        let added = Arc::new(Mutex::new(Vec::new()));
        let added_clone = added.clone();
        let make = Arc::new(make);
        let make_clone = make.clone();
        let _adder = channel.subscribe(move || {
            let mut added = added_clone.lock().unwrap();
            if added.is_empty() {
                added.push(channel_clone.subscribe((*make_clone)("late")));
            }
        });

        channel.notify();
        assert!(log.lock().unwrap().is_empty());

        channel.notify();
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        // ---
        let channel = Subscribable::new();
        let (log, make) = recorder();

        let _boom = channel.subscribe(|| panic!("subscriber failure"));
        let _ok = channel.subscribe(make("ok"));

        assert_eq!(channel.notify(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok"]);
    }

    #[test]
    fn test_counting_version_advances_per_notify() {
        // ---
        let counting = CountingSubscribable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let counter = counting.clone();
        let _u = counting.subscribe(move || seen_clone.lock().unwrap().push(counter.version()));

        assert_eq!(counting.version(), 0);
        counting.notify();
        counting.notify();

        assert_eq!(counting.version(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
