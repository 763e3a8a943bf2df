//! Change notification bookkeeping.
//!
//! Every store handle owns a [`Registry`]. Registries live inside the shared
//! store state so that a single lock guards data and subscriptions alike.
//! Callbacks are collected as [`Pending`] while the lock is held and fired
//! after it was released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the changed key, relative to the handle it was
/// registered on.
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifier of a subscription. Unique across a store and all its sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a store handle within its family.
pub(crate) type HandleId = u64;

/// Bucket key for subscriptions that want every change.
const ALL_KEYS: &str = "";

/// Subscriptions of one store handle.
pub(crate) struct Registry {
    prefix: String,
    /// Full dotted key (or [`ALL_KEYS`]) to subscriptions.
    buckets: BTreeMap<String, BTreeMap<SubscriptionId, Callback>>,
}

impl Registry {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            buckets: BTreeMap::new(),
        }
    }

    /// Register `callback` for the full key `bucket`; the empty bucket
    /// receives every change below the handle's prefix.
    pub(crate) fn add(&mut self, bucket: String, id: SubscriptionId, callback: Callback) {
        self.buckets.entry(bucket).or_default().insert(id, callback);
    }

    /// Detach subscription `id`. The callback is handed back so the caller
    /// can drop it once the store lock is released.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<Callback> {
        let mut removed = None;
        self.buckets.retain(|_, bucket| {
            if let Some(callback) = bucket.remove(&id) {
                removed = Some(callback);
            }
            !bucket.is_empty()
        });
        removed
    }

    /// Detach every subscription, handing the callbacks back to the caller.
    pub(crate) fn take(&mut self) -> Vec<Callback> {
        std::mem::take(&mut self.buckets)
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    /// Queue every subscription interested in the committed `full_key`.
    pub(crate) fn collect(&self, full_key: &str, out: &mut Vec<Pending>) {
        let Some(relative) = strip_prefix(&self.prefix, full_key) else {
            return;
        };

        for bucket in [full_key, ALL_KEYS] {
            if let Some(callbacks) = self.buckets.get(bucket) {
                out.extend(callbacks.values().map(|callback| Pending {
                    callback: Arc::clone(callback),
                    key: relative.to_string(),
                }));
            }
        }
    }
}

/// `full_key` relative to `prefix`, or `None` if it lies outside of it.
pub(crate) fn strip_prefix<'a>(prefix: &str, full_key: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(full_key);
    }
    full_key.strip_prefix(prefix)?.strip_prefix('.')
}

/// A callback queued for delivery after the store lock is released.
pub(crate) struct Pending {
    callback: Callback,
    key: String,
}

/// Deliver queued callbacks in order.
pub(crate) fn fire(pending: Vec<Pending>) {
    for Pending { callback, key } in pending {
        callback(&key);
    }
}
