//! Configuration and statistics types for [`Link`](crate::Link).

/// How a panicking subscriber callback is handled during dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Keep delivering to the remaining subscribers, then resume the first
    /// panic on the publishing thread.
    #[default]
    Propagate,
    /// Log the panic and carry on as if the callback had returned.
    Isolate,
}

/// Channel configuration.
#[derive(Clone, Debug, Default)]
pub struct LinkConfig {
    /// Replay the cached last value to each new subscriber.
    /// Default: false
    pub replay_last_value: bool,

    /// Fault handling for subscriber callbacks and the filter predicate.
    pub panic_policy: PanicPolicy,
}

impl LinkConfig {
    /// Configuration with last-value replay turned on.
    pub fn replaying() -> Self {
        Self {
            replay_last_value: true,
            ..Default::default()
        }
    }
}

/// Point-in-time channel statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Currently registered subscribers.
    pub subscribers: usize,
    /// Total `publish` / `try_publish` calls.
    pub published: u64,
    /// Total callback invocations from publishes (replays not counted).
    pub delivered: u64,
    /// Publishes the filter rejected while subscribers were registered.
    pub suppressed: u64,
    /// Whether a filter predicate is active.
    pub has_filter: bool,
    /// Whether a value has been cached.
    pub has_last_value: bool,
}
