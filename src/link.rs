//! The broadcast channel tying registry, filter and cache together.

use crate::error::{panic_message, LinkError, Result};
use crate::subscriptions::{Callback, SubscriberRegistry, SubscriptionGuard, SubscriptionId};
use crate::types::{LinkConfig, LinkStats, PanicPolicy};
use parking_lot::{ReentrantMutex, RwLock};
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Channel-wide filter predicate.
type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Everything guarded by the state lock.
struct LinkState<T> {
    registry: SubscriberRegistry<T>,
    filter: Option<Filter<T>>,
    last_value: Option<Arc<T>>,
}

/// What dispatch does with a caught panic.
#[derive(Clone, Copy)]
enum FaultMode {
    /// Keep the first fault and hand it back to the caller.
    Collect,
    /// Log and discard.
    Isolate,
}

/// Publishes issued from inside a callback while this thread is already
/// dispatching. Lives inside the gate, so only the gate holder touches it.
struct DispatchQueue<T> {
    active: bool,
    pending: VecDeque<(T, FaultMode)>,
}

/// A panic caught while dispatching. `id` is `None` for the filter.
struct Fault {
    id: Option<SubscriptionId>,
    payload: Box<dyn Any + Send>,
}

impl Fault {
    fn into_error(self) -> LinkError {
        let message = panic_message(self.payload.as_ref());
        match self.id {
            Some(id) => LinkError::SubscriberPanicked { id, message },
            None => LinkError::FilterPanicked { message },
        }
    }
}

/// A thread-safe single-channel broadcast.
///
/// Every published value fans out to every registered subscriber, optionally
/// gated by one channel-wide filter predicate. The most recent value is
/// cached and, when the channel was built with replay enabled, handed to each
/// new subscriber as it registers.
///
/// # Locking
///
/// Registry, filter and cached value share one [`RwLock`] that is only held
/// for short reads and writes, never while user code runs. Publishing (and
/// replaying subscribes) additionally take a reentrant dispatch gate, so
/// values reach each subscriber in publish order and a subscriber may call
/// back into the channel from its own callback. A publish made from inside a
/// callback is queued and delivered once the current fan-out has finished,
/// so it returns before its value is cached or delivered. A callback that
/// blocks on another thread which is itself publishing to the same channel
/// will deadlock.
pub struct Link<T> {
    config: LinkConfig,
    state: RwLock<LinkState<T>>,
    /// Serializes cache update + fan-out across publishers.
    gate: ReentrantMutex<RefCell<DispatchQueue<T>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    suppressed: AtomicU64,
}

impl<T> Link<T> {
    /// Create a channel without last-value replay.
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    /// Create a channel, choosing whether late subscribers get the last value.
    pub fn with_replay(replay_last_value: bool) -> Self {
        Self::with_config(LinkConfig {
            replay_last_value,
            ..Default::default()
        })
    }

    /// Create a channel from a full configuration.
    pub fn with_config(config: LinkConfig) -> Self {
        Self {
            config,
            state: RwLock::new(LinkState {
                registry: SubscriberRegistry::new(),
                filter: None,
                last_value: None,
            }),
            gate: ReentrantMutex::new(RefCell::new(DispatchQueue {
                active: false,
                pending: VecDeque::new(),
            })),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// The configuration this channel was built with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Whether new subscribers receive the cached last value.
    pub fn replays_last_value(&self) -> bool {
        self.config.replay_last_value
    }

    // --- Subscribing ---

    /// Register a callback and return its id.
    ///
    /// With replay enabled and a cached value present, the callback receives
    /// that value before this returns, regardless of the active filter. A
    /// concurrent publish lands either entirely before or entirely after.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let id = SubscriptionId::next();

        if !self.config.replay_last_value {
            let subscribers = {
                let mut state = self.state.write();
                state.registry.insert(id, callback);
                state.registry.len()
            };
            debug!(%id, subscribers, "subscribed");
            return id;
        }

        let gate = self.gate.lock();
        let (cached, subscribers) = {
            let mut state = self.state.write();
            state.registry.insert(id, Arc::clone(&callback));
            (state.last_value.clone(), state.registry.len())
        };
        debug!(%id, subscribers, replay = cached.is_some(), "subscribed");

        if let Some(value) = cached {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&*value))) {
                match self.config.panic_policy {
                    PanicPolicy::Isolate => {
                        error!(%id, panic = %panic_message(payload.as_ref()), "subscriber panicked during replay");
                    }
                    PanicPolicy::Propagate => {
                        let filter_cleared = {
                            let mut state = self.state.write();
                            state.registry.remove(id);
                            state.registry.is_empty() && state.filter.take().is_some()
                        };
                        warn!(%id, filter_cleared, "subscriber panicked during replay, registration rolled back");
                        drop(gate);
                        resume_unwind(payload);
                    }
                }
            }
        }

        id
    }

    /// Register a callback that is unsubscribed when the returned guard drops.
    pub fn subscribe_scoped<F>(&self, callback: F) -> SubscriptionGuard<'_, T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.subscribe(callback);
        SubscriptionGuard::new(self, id)
    }

    /// Remove subscriptions. Unknown ids are ignored.
    ///
    /// Publishes that start after this returns never reach the removed ids;
    /// one already dispatching may still deliver to them. If no subscribers
    /// remain afterwards, the filter is cleared.
    pub fn unsubscribe<I>(&self, ids: I)
    where
        I: IntoIterator<Item = SubscriptionId>,
    {
        let ids: Vec<SubscriptionId> = ids.into_iter().collect();

        let (removed, remaining, filter_cleared) = {
            let mut state = self.state.write();
            let removed = state.registry.remove_all(ids);
            let filter_cleared = state.registry.is_empty() && state.filter.take().is_some();
            (removed, state.registry.len(), filter_cleared)
        };

        debug!(removed, remaining, "unsubscribed");
        if filter_cleared {
            debug!("no subscribers left, filter cleared");
        }
    }

    /// Whether `id` is currently registered on this channel.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.state.read().registry.contains(id)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state.read().registry.len()
    }

    /// True when no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().registry.is_empty()
    }

    // --- Filtering ---

    /// Install a filter, replacing any existing one.
    ///
    /// The predicate runs once per publish and gates delivery to all
    /// subscribers at once. Returns `self` for chaining.
    pub fn filter<P>(&self, predicate: P) -> &Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let replaced = self.state.write().filter.replace(Arc::new(predicate)).is_some();
        debug!(replaced, "filter set");
        self
    }

    /// Remove the active filter, if any. Returns `self` for chaining.
    pub fn clear_filter(&self) -> &Self {
        if self.state.write().filter.take().is_some() {
            debug!("filter cleared");
        }
        self
    }

    /// Whether a filter predicate is active.
    pub fn has_filter(&self) -> bool {
        self.state.read().filter.is_some()
    }

    // --- Publishing ---

    /// Cache `value` and deliver it to every subscriber the filter admits.
    ///
    /// A panicking subscriber is handled per [`PanicPolicy`]: under
    /// `Propagate` the others still get the value and the first panic then
    /// resumes here.
    pub fn publish(&self, value: T) {
        let mode = match self.config.panic_policy {
            PanicPolicy::Propagate => FaultMode::Collect,
            PanicPolicy::Isolate => FaultMode::Isolate,
        };

        if let Some(fault) = self.dispatch(value, mode) {
            match fault.id {
                Some(id) => warn!(%id, "subscriber panicked, resuming on publisher"),
                None => warn!("filter panicked, resuming on publisher"),
            }
            resume_unwind(fault.payload);
        }
    }

    /// Like [`publish`](Self::publish), but report the first panic as an error.
    ///
    /// All admitted subscribers are still attempted, independent of the
    /// configured [`PanicPolicy`]. Called from inside a callback, the value is
    /// only queued and this returns `Ok(())`; faults from its delivery reach
    /// the outermost publisher instead.
    pub fn try_publish(&self, value: T) -> Result<()> {
        match self.dispatch(value, FaultMode::Collect) {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    /// The most recently published value, if any.
    pub fn last_value(&self) -> Option<Arc<T>> {
        self.state.read().last_value.clone()
    }

    /// Snapshot of subscriber count, counters and cache/filter presence.
    pub fn stats(&self) -> LinkStats {
        let state = self.state.read();
        LinkStats {
            subscribers: state.registry.len(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            has_filter: state.filter.is_some(),
            has_last_value: state.last_value.is_some(),
        }
    }

    /// Shared publish path. Returns the first fault when collecting.
    ///
    /// A call made while this thread is already dispatching only enqueues
    /// the value; the outermost call drains the queue in order, so nested
    /// publishes never overtake the value being fanned out.
    fn dispatch(&self, value: T, mode: FaultMode) -> Option<Fault> {
        let gate = self.gate.lock();
        {
            let mut queue = gate.borrow_mut();
            if queue.active {
                queue.pending.push_back((value, mode));
                trace!(queued = queue.pending.len(), "nested publish queued");
                return None;
            }
            queue.active = true;
        }

        let mut first_fault = None;
        let mut next = Some((value, mode));
        while let Some((value, mode)) = next {
            let fault = self.deliver(value, mode);
            if first_fault.is_none() {
                first_fault = fault;
            }
            next = gate.borrow_mut().pending.pop_front();
        }
        gate.borrow_mut().active = false;

        first_fault
    }

    /// Cache one value and fan it out to the current subscribers.
    fn deliver(&self, value: T, mode: FaultMode) -> Option<Fault> {
        let value = Arc::new(value);

        let (subscribers, filter) = {
            let mut state = self.state.write();
            state.last_value = Some(Arc::clone(&value));
            (state.registry.snapshot(), state.filter.clone())
        };
        self.published.fetch_add(1, Ordering::Relaxed);

        if subscribers.is_empty() {
            trace!("published with no subscribers");
            return None;
        }

        if let Some(filter) = filter {
            match catch_unwind(AssertUnwindSafe(|| filter(&*value))) {
                Ok(true) => {}
                Ok(false) => {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    trace!(subscribers = subscribers.len(), "filtered out");
                    return None;
                }
                Err(payload) => match mode {
                    FaultMode::Collect => return Some(Fault { id: None, payload }),
                    FaultMode::Isolate => {
                        error!(panic = %panic_message(payload.as_ref()), "filter panicked, value dropped");
                        self.suppressed.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                },
            }
        }

        let mut first_fault = None;
        for (id, callback) in &subscribers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&*value))) {
                match mode {
                    FaultMode::Collect => {
                        if first_fault.is_none() {
                            first_fault = Some(Fault { id: Some(*id), payload });
                        }
                    }
                    FaultMode::Isolate => {
                        error!(%id, panic = %panic_message(payload.as_ref()), "subscriber panicked");
                    }
                }
            }
        }
        self.delivered
            .fetch_add(subscribers.len() as u64, Ordering::Relaxed);
        trace!(delivered = subscribers.len(), "published");

        first_fault
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
