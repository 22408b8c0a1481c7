//! Keyed notification registry.
//!
//! A [`KeyedSubscribable`] holds one independent [`Subscribable`] per key.
//! Channels are created lazily, the first time a key is asked for, and are
//! kept for the key's lifetime by default. Long-lived processes that churn
//! through many short-lived keys can opt into pruning with
//! [`KeyedSubscribable::with_pruning`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

use super::listeners::Unsubscriber;
use super::Subscribable;
use crate::sync::lock_ignore_poison;

struct KeyEntry<K> {
    channel: Subscribable,
    subscriber: KeySubscriber<K>,
}

struct Registry<K> {
    channels: Mutex<HashMap<K, KeyEntry<K>>>,
    // Handles of pruned keys, so a key that comes back keeps its identity
    // while anyone still holds its `KeySubscriber`. Locked after `channels`.
    retired: Mutex<HashMap<K, Weak<KeySubscriberInner<K>>>>,
    prune_empty: bool,
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    // ---

    fn entry<'a>(
        this: &Arc<Self>,
        channels: &'a mut HashMap<K, KeyEntry<K>>,
        key: &K,
    ) -> &'a mut KeyEntry<K> {
        // ---
        channels.entry(key.clone()).or_insert_with(|| {
            let revived = lock_ignore_poison(&this.retired)
                .remove(key)
                .and_then(|handle| handle.upgrade());
            let shared = revived.unwrap_or_else(|| {
                Arc::new(KeySubscriberInner {
                    key: key.clone(),
                    registry: Arc::downgrade(this),
                })
            });
            KeyEntry {
                channel: Subscribable::new(),
                subscriber: KeySubscriber { shared },
            }
        })
    }

    // Subscribing happens under the registry lock so that a concurrent prune
    // of the same key cannot remove the channel between lookup and insert.
    fn subscribe(this: &Arc<Self>, key: &K, callback: impl Fn() + Send + Sync + 'static) -> Unsubscriber {
        // ---
        let mut channels = lock_ignore_poison(&this.channels);
        let unsub = Self::entry(this, &mut channels, key).channel.subscribe(callback);

        if !this.prune_empty {
            return unsub;
        }

        let registry = Arc::downgrade(this);
        let key = key.clone();
        unsub.on_detached(move || {
            if let Some(registry) = registry.upgrade() {
                registry.prune(&key);
            }
        })
    }

    fn prune(&self, key: &K) {
        // ---
        let mut channels = lock_ignore_poison(&self.channels);
        if !channels.get(key).is_some_and(|e| e.channel.is_empty()) {
            return;
        }
        if let Some(entry) = channels.remove(key) {
            let mut retired = lock_ignore_poison(&self.retired);
            retired.retain(|_, handle| handle.strong_count() > 0);
            retired.insert(key.clone(), Arc::downgrade(&entry.subscriber.shared));
        }
    }
}

struct KeySubscriberInner<K> {
    key: K,
    registry: Weak<Registry<K>>,
}

/// Subscribe function bound to a single key.
///
/// Returned by [`KeyedSubscribable::get_subscriber`]. Repeated lookups of the
/// same key return handles that compare equal, so the handle can be cached or
/// used as a stable identity by consumers.
pub struct KeySubscriber<K> {
    shared: Arc<KeySubscriberInner<K>>,
}

impl<K> KeySubscriber<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// The key this handle subscribes to.
    pub fn key(&self) -> &K {
        &self.shared.key
    }

    /// Register `callback` for notifications on this key.
    ///
    /// If the registry has been dropped the returned handle is inert.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscriber
    where
        F: Fn() + Send + Sync + 'static,
    {
        // ---
        match self.shared.registry.upgrade() {
            Some(registry) => Registry::subscribe(&registry, &self.shared.key, callback),
            None => Unsubscriber::detached(),
        }
    }
}

impl<K> Clone for KeySubscriber<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K> PartialEq for KeySubscriber<K> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<K> Eq for KeySubscriber<K> {}

impl<K: std::fmt::Debug> std::fmt::Debug for KeySubscriber<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySubscriber")
            .field("key", &self.shared.key)
            .finish()
    }
}

/// Registry of independent notification channels addressed by key.
///
/// ```
/// use mux_rpc::KeyedSubscribable;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let rooms: KeyedSubscribable<String> = KeyedSubscribable::new();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let h = hits.clone();
/// let _unsub = rooms.get_subscriber(&"room:1".to_string()).subscribe(move || {
///     h.fetch_add(1, Ordering::SeqCst);
/// });
///
/// rooms.notify(&"room:2".to_string());
/// rooms.notify(&"room:1".to_string());
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct KeyedSubscribable<K> {
    registry: Arc<Registry<K>>,
}

impl<K> KeyedSubscribable<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    // ---

    /// Create a registry that keeps every key's channel once created.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create a registry that drops a key's channel once its last subscriber
    /// unsubscribes.
    ///
    /// A notify already in progress for that key keeps its own handle to the
    /// channel and completes normally. Previously returned
    /// [`KeySubscriber`]s stay usable and recreate the channel on demand.
    /// While any of them is alive, `get_subscriber` for that key keeps
    /// returning a handle equal to them.
    pub fn with_pruning() -> Self {
        Self::build(true)
    }

    fn build(prune_empty: bool) -> Self {
        // ---
        Self {
            registry: Arc::new(Registry {
                channels: Mutex::new(HashMap::new()),
                retired: Mutex::new(HashMap::new()),
                prune_empty,
            }),
        }
    }

    /// Return the subscribe function for `key`, creating its channel if needed.
    pub fn get_subscriber(&self, key: &K) -> KeySubscriber<K> {
        // ---
        let mut channels = lock_ignore_poison(&self.registry.channels);
        Registry::entry(&self.registry, &mut channels, key)
            .subscriber
            .clone()
    }

    /// Invoke the subscribers registered under `key` only.
    ///
    /// Unknown keys are a no-op. Returns how many subscribers ran.
    pub fn notify(&self, key: &K) -> usize {
        // ---
        let channel = lock_ignore_poison(&self.registry.channels)
            .get(key)
            .map(|entry| entry.channel.clone());

        match channel {
            Some(channel) => channel.notify(),
            None => 0,
        }
    }

    /// Number of keys that currently have a channel.
    pub fn key_count(&self) -> usize {
        lock_ignore_poison(&self.registry.channels).len()
    }

    /// Number of subscribers registered under `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        lock_ignore_poison(&self.registry.channels)
            .get(key)
            .map_or(0, |entry| entry.channel.subscriber_count())
    }
}

impl<K> Default for KeyedSubscribable<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for KeyedSubscribable<K> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_keys_are_isolated() {
        // ---
        let rooms: KeyedSubscribable<&'static str> = KeyedSubscribable::new();
        let (one, cb_one) = counter();
        let (two, cb_two) = counter();

        let _a = rooms.get_subscriber(&"room:1").subscribe(cb_one);
        let _b = rooms.get_subscriber(&"room:2").subscribe(cb_two);

        assert_eq!(rooms.notify(&"room:1"), 1);
        assert_eq!(one.load(Ordering::SeqCst), 1);
        assert_eq!(two.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_subscriber_is_stable_per_key() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::new();

        assert_eq!(rooms.get_subscriber(&1), rooms.get_subscriber(&1));
        assert_ne!(rooms.get_subscriber(&1), rooms.get_subscriber(&2));
        assert_eq!(rooms.key_count(), 2);
    }

    #[test]
    fn test_notify_unknown_key_is_noop() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::new();
        assert_eq!(rooms.notify(&42), 0);
        assert_eq!(rooms.key_count(), 0);
    }

    #[test]
    fn test_entry_survives_last_unsubscribe_without_pruning() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::new();
        let (hits, cb) = counter();

        let unsub = rooms.get_subscriber(&7).subscribe(cb);
        unsub.unsubscribe();

        assert_eq!(rooms.key_count(), 1);
        assert_eq!(rooms.notify(&7), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pruning_removes_empty_entry() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::with_pruning();
        let subscriber = rooms.get_subscriber(&7);

        let first = subscriber.subscribe(|| {});
        let second = subscriber.subscribe(|| {});

        first.unsubscribe();
        assert_eq!(rooms.subscriber_count(&7), 1);

        second.unsubscribe();
        assert_eq!(rooms.key_count(), 0);

        // The cached handle recreates the channel on demand.
        let (hits, cb) = counter();
        let _again = subscriber.subscribe(cb);
        assert_eq!(rooms.notify(&7), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pruned_key_keeps_handle_identity() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::with_pruning();
        let held = rooms.get_subscriber(&7);

        held.subscribe(|| {}).unsubscribe();
        assert_eq!(rooms.key_count(), 0);

        assert_eq!(rooms.get_subscriber(&7), held);
        assert_eq!(rooms.key_count(), 1);

        // Subscribing through the old handle lands on the same channel.
        let (hits, cb) = counter();
        let _unsub = held.subscribe(cb);
        assert_eq!(rooms.notify(&7), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retired_handles_are_released() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::with_pruning();
        for key in 0..100 {
            rooms.get_subscriber(&key).subscribe(|| {}).unsubscribe();
        }

        assert_eq!(rooms.key_count(), 0);
        assert!(lock_ignore_poison(&rooms.registry.retired).len() <= 1);
    }

    #[test]
    fn test_prune_during_notify_does_not_break_pass() {
        // ---
        let rooms: KeyedSubscribable<u32> = KeyedSubscribable::with_pruning();
        let slot: Arc<Mutex<Vec<Unsubscriber>>> = Arc::new(Mutex::new(Vec::new()));

        let slot_clone = slot.clone();
        let first = rooms.get_subscriber(&1).subscribe(move || {
            for unsub in slot_clone.lock().unwrap().iter() {
                unsub.unsubscribe();
            }
        });
        let (hits, cb) = counter();
        let second = rooms.get_subscriber(&1).subscribe(cb);
        slot.lock().unwrap().extend([first, second]);

        assert_eq!(rooms.notify(&1), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(rooms.key_count(), 0);
    }
}
