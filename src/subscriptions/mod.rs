//! Subscriber bookkeeping for a [`Link`](crate::Link).
//!
//! This module provides:
//! - Opaque, process-unique subscription identifiers
//! - The id → callback registry guarded by the channel's state lock
//! - Scoped handles that unsubscribe when dropped
//!
//! # Example
//!
//! ```ignore
//! let link = Link::<u32>::new();
//!
//! // Manual lifecycle
//! let id = link.subscribe(|v| println!("got {v}"));
//! link.unsubscribe([id]);
//!
//! // Scoped lifecycle
//! {
//!     let _guard = link.subscribe_scoped(|v| println!("scoped {v}"));
//!     link.publish(1);
//! } // unsubscribed here
//! ```

mod registry;
mod types;

pub(crate) use registry::{Callback, SubscriberRegistry};
pub use types::{SubscriptionGuard, SubscriptionId};
