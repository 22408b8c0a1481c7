//! Shared subscriber-set machinery.
//!
//! Every fan-out primitive in this module is a thin typed wrapper over
//! [`Listeners`], which owns the ordered set of callbacks and implements the
//! two properties all of them promise:
//!
//! - **Snapshot iteration.** A fan-out pass iterates over a copy of the set
//!   taken when the pass starts. Callbacks added during the pass are not
//!   invoked until the next pass.
//! - **Live removal.** Each entry carries an `active` flag that is cleared on
//!   unsubscribe. A callback removed mid-pass is skipped if it has not run yet.
//!
//! Callbacks are invoked with no lock held, so a callback may freely
//! subscribe, unsubscribe, or trigger another fan-out on the same set.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::log_error;
use crate::sync::lock_ignore_poison;

struct Entry<F: ?Sized> {
    active: Arc<AtomicBool>,
    callback: Arc<F>,
}

impl<F: ?Sized> Clone for Entry<F> {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
            callback: self.callback.clone(),
        }
    }
}

struct ListenerSet<F: ?Sized> {
    // Ids are monotonic, so map order is subscription order.
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Entry<F>>>,
}

/// Type-erased removal, so [`Unsubscriber`] does not carry the callback type.
trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<F: ?Sized + Send + Sync> Detach for ListenerSet<F> {
    fn detach(&self, id: u64) -> bool {
        // ---
        let removed = lock_ignore_poison(&self.entries).remove(&id);
        match removed {
            Some(entry) => {
                entry.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

/// Ordered, snapshot-iterated set of callbacks of type `F`.
pub(crate) struct Listeners<F: ?Sized> {
    set: Arc<ListenerSet<F>>,
}

impl<F: ?Sized> Clone for Listeners<F> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
        }
    }
}

impl<F: ?Sized + Send + Sync + 'static> Listeners<F> {
    // ---

    pub(crate) fn new() -> Self {
        // ---
        Self {
            set: Arc::new(ListenerSet {
                next_id: AtomicU64::new(0),
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Add a callback and return the handle that removes it.
    pub(crate) fn insert(&self, callback: Arc<F>) -> Unsubscriber {
        // ---
        let id = self.set.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            active: Arc::new(AtomicBool::new(true)),
            callback,
        };
        lock_ignore_poison(&self.set.entries).insert(id, entry);

        let set: Weak<dyn Detach> = Arc::downgrade(&self.set) as Weak<dyn Detach>;
        Unsubscriber {
            set: Some(set),
            id,
            on_detached: None,
        }
    }

    /// Invoke `call` once per subscriber in the snapshot taken on entry.
    ///
    /// A panicking subscriber is logged and skipped; the remaining
    /// subscribers of the same pass still run. Returns the number of
    /// subscribers that completed without panicking.
    pub(crate) fn fan_out(&self, mut call: impl FnMut(&F)) -> usize {
        // ---
        let snapshot: Vec<Entry<F>> = lock_ignore_poison(&self.set.entries)
            .values()
            .cloned()
            .collect();

        let mut delivered = 0;
        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            let callback = &*entry.callback;
            match panic::catch_unwind(AssertUnwindSafe(|| call(callback))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    log_error!("subscriber panicked during fan-out: {}", panic_message(payload.as_ref()));
                }
            }
        }
        delivered
    }

    pub(crate) fn len(&self) -> usize {
        lock_ignore_poison(&self.set.entries).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn same_set(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.set, &other.set)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    // ---
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Handle returned by every `subscribe` call in this crate.
///
/// Calling [`unsubscribe`](Self::unsubscribe) removes the callback. The call
/// is idempotent and safe to make from inside the callback itself, including
/// while a fan-out pass on the same set is in progress.
///
/// Dropping the handle does **not** unsubscribe; a subscription lives until it
/// is explicitly removed or its owning set is dropped.
#[must_use = "dropping an Unsubscriber leaves the callback subscribed forever"]
pub struct Unsubscriber {
    // ---
    set: Option<Weak<dyn Detach>>,
    id: u64,
    on_detached: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Unsubscriber {
    // ---

    /// A handle that is not attached to anything; `unsubscribe` is a no-op.
    pub(crate) fn detached() -> Self {
        // ---
        Self {
            set: None,
            id: 0,
            on_detached: None,
        }
    }

    /// Run `hook` after this handle successfully removes its callback.
    pub(crate) fn on_detached(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        // ---
        self.on_detached = Some(Box::new(hook));
        self
    }

    /// Remove the callback.
    ///
    /// Returns `true` if this call removed it, `false` if it had already been
    /// removed (or the owning set no longer exists).
    pub fn unsubscribe(&self) -> bool {
        // ---
        let Some(set) = self.set.as_ref().and_then(Weak::upgrade) else {
            return false;
        };

        let removed = set.detach(self.id);
        if removed {
            if let Some(hook) = &self.on_detached {
                hook();
            }
        }
        removed
    }
}

impl std::fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscriber").field("id", &self.id).finish()
    }
}
