//! Registry mapping subscription ids to callbacks.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::SubscriptionId;

/// A registered subscriber callback.
pub(crate) type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Live set of subscribers.
///
/// Not synchronized on its own: the owning channel keeps it behind the same
/// lock as the filter and cached value. Iteration is in ascending id order,
/// which is stable for a given set of subscribers. Ids are minted before the
/// lock is taken, so concurrent subscribes may land out of id order.
pub(crate) struct SubscriberRegistry<T> {
    subscribers: BTreeMap<SubscriptionId, Callback<T>>,
}

impl<T> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: SubscriptionId, callback: Callback<T>) {
        self.subscribers.insert(id, callback);
    }

    /// Remove a single subscriber. Returns false if it was not registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Remove every listed id, ignoring unknown ones. Returns how many were removed.
    pub fn remove_all<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = SubscriptionId>,
    {
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Copy of the current subscribers, for dispatching outside the lock.
    pub fn snapshot(&self) -> Vec<(SubscriptionId, Callback<T>)> {
        self.subscribers
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect()
    }
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
