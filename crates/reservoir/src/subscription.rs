//! # Ordered listener list
//!
//! [`SubscriptionList`] keeps listeners in subscription order and calls them
//! one by one on [`notify`](SubscriptionList::notify).
//!
//! ## Rules
//! - Every `subscribe` call registers a new entry, even for the same closure.
//! - A listener may remove itself or any other listener while a notification
//!   is running. Entries removed ahead of the cursor are skipped; entries added
//!   during the walk are visited in the same pass.
//! - A panicking listener is caught and logged; the walk continues.
//! - Removing an entry twice is a no-op.
//!
//! ```text
//! notify(&arg)
//!   cursor = 0
//!   loop {
//!     lock → first entry with id ≥ cursor → unlock
//!     call listener(&arg)      (no lock held)
//!     cursor = id + 1
//!   }
//! ```
//!
//! Entries live in a `BTreeMap` keyed by a monotonically increasing id, so
//! the id order is the subscription order and the cursor never needs a node
//! that may already be gone.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use crate::error::panic_message;
use crate::sync::lock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entries<T> {
    next_id: u64,
    listeners: BTreeMap<u64, Listener<T>>,
}

/// Ordered multi-listener registry.
pub struct SubscriptionList<T> {
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T> Clone for SubscriptionList<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for SubscriptionList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SubscriptionList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionList")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> SubscriptionList<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.entries).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> SubscriptionList<T> {
    /// Appends a listener and returns the guard that removes it.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> ListenerGuard {
        let id = {
            let mut entries = lock(&self.entries);
            let id = entries.next_id;
            entries.next_id += 1;
            entries.listeners.insert(id, Arc::new(listener));
            id
        };

        let weak: Weak<Mutex<Entries<T>>> = Arc::downgrade(&self.entries);
        ListenerGuard::new(move || {
            if let Some(entries) = weak.upgrade() {
                lock(&entries).listeners.remove(&id);
            }
        })
    }

    /// Calls every registered listener in subscription order.
    pub fn notify(&self, arg: &T) {
        let mut cursor = 0u64;
        loop {
            let next = {
                let entries = lock(&self.entries);
                entries
                    .listeners
                    .range(cursor..)
                    .next()
                    .map(|(id, f)| (*id, Arc::clone(f)))
            };
            let Some((id, listener)) = next else {
                break;
            };
            cursor = id + 1;

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(arg))) {
                tracing::error!(
                    listener = id,
                    panic = %panic_message(panic.as_ref()),
                    "listener panicked during notify"
                );
            }
        }
    }
}

/// Removes its listener on [`unsubscribe`](ListenerGuard::unsubscribe) or drop.
#[must_use = "dropping the guard removes the listener immediately"]
pub struct ListenerGuard {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ListenerGuard {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Removes the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let remove = lock(&self.remove).take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Keeps the listener registered for the lifetime of the list.
    pub fn detach(self) {
        lock(&self.remove).take();
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("active", &lock(&self.remove).is_some())
            .finish()
    }
}
