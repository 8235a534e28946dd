//! Subscription identifiers and handles.

use crate::link::Link;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter shared by every channel in the process, so an id minted by one
/// channel never names a subscriber of another.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription.
///
/// Only minted by [`Link::subscribe`]; never reused within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        SubscriptionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logging and diagnostics.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle that unsubscribes when dropped.
///
/// Created by [`Link::subscribe_scoped`]. Dropping the last guard of a channel
/// clears its filter just like an explicit [`Link::unsubscribe`] would.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard<'a, T> {
    link: &'a Link<T>,
    id: SubscriptionId,
    active: bool,
}

impl<'a, T> SubscriptionGuard<'a, T> {
    pub(crate) fn new(link: &'a Link<T>, id: SubscriptionId) -> Self {
        Self {
            link,
            id,
            active: true,
        }
    }

    /// The underlying subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now rather than at end of scope.
    pub fn unsubscribe(mut self) {
        self.active = false;
        self.link.unsubscribe([self.id]);
    }

    /// Give up the guard but keep the subscription registered.
    ///
    /// The returned id must then be passed to [`Link::unsubscribe`] manually.
    pub fn detach(mut self) -> SubscriptionId {
        self.active = false;
        self.id
    }
}

impl<T> fmt::Debug for SubscriptionGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl<T> Drop for SubscriptionGuard<'_, T> {
    fn drop(&mut self) {
        if self.active {
            self.link.unsubscribe([self.id]);
        }
    }
}
