//! Error types for the broadcast channel.

use crate::subscriptions::SubscriptionId;
use std::any::Any;
use thiserror::Error;

/// Faults surfaced by fallible channel operations.
///
/// The core operations (`publish`, `subscribe`, `unsubscribe`, `filter`) are
/// total; these only come back from [`Link::try_publish`](crate::Link::try_publish).
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Subscriber {id} panicked: {message}")]
    SubscriberPanicked { id: SubscriptionId, message: String },

    #[error("Filter predicate panicked: {message}")]
    FilterPanicked { message: String },
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, LinkError>;
