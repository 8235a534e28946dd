//! # Link
//!
//! A thread-safe, single-channel broadcast primitive: values published on a
//! [`Link`] fan out to every registered subscriber.
//!
//! ## Core Concepts
//!
//! - **Subscribers**: Callbacks registered at runtime, identified by an opaque [`SubscriptionId`]
//! - **Filter**: One optional predicate gating each published value for all subscribers
//! - **Last value**: The most recent value is always cached, and can be replayed to late subscribers
//! - **Fault policy**: A panicking subscriber either propagates to the publisher or is isolated
//!
//! ## Example
//!
//! ```
//! use link::Link;
//! use std::sync::{Arc, Mutex};
//!
//! let link = Link::with_replay(true);
//! link.publish(42);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let id = link
//!     .filter(|v: &i32| v % 2 == 0)
//!     .subscribe(move |v| sink.lock().unwrap().push(*v));
//!
//! link.publish(23);
//! link.publish(8);
//! link.unsubscribe([id]);
//!
//! // 42 was replayed on subscribe; 23 was filtered out.
//! assert_eq!(*seen.lock().unwrap(), vec![42, 8]);
//! ```

pub mod error;
pub mod link;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{LinkError, Result};
pub use link::Link;
pub use subscriptions::{SubscriptionGuard, SubscriptionId};
pub use types::{LinkConfig, LinkStats, PanicPolicy};
