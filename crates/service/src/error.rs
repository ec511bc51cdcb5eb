//! Service error types.

use common::Sku;
use domain::{AllocationError, EventKind};
use store::StoreError;
use thiserror::Error;

/// Errors raised by handlers and the message bus.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The sku is unknown to the system.
    #[error("Invalid sku {sku}")]
    InvalidSku { sku: Sku },

    /// No batch can take the requested quantity.
    #[error("Out of stock for sku {sku}")]
    OutOfStock { sku: Sku },

    /// A lookup that had to succeed found nothing.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The aggregate refused the operation.
    #[error("Domain error: {0}")]
    Domain(AllocationError),

    /// Persistence failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The notification channel failed.
    #[error("Notification failed: {0}")]
    Notification(String),

    /// The outbound publisher failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound message could not be turned into an event.
    #[error("Invalid message on channel '{channel}': {reason}")]
    InvalidMessage { channel: String, reason: String },

    /// A handler was given an event it is not registered for.
    #[error("Handler {handler} cannot handle {kind} events")]
    UnexpectedEvent {
        handler: &'static str,
        kind: EventKind,
    },

    /// One bus run processed more events than allowed.
    #[error("Message bus run exceeded {limit} events")]
    CascadeLimitExceeded { limit: usize },
}

impl From<AllocationError> for ServiceError {
    fn from(error: AllocationError) -> Self {
        match error {
            AllocationError::OutOfStock { sku } => ServiceError::OutOfStock { sku },
            other => ServiceError::Domain(other),
        }
    }
}

impl ServiceError {
    /// Returns true if repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_retryable())
    }
}

/// Convenience type alias for service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
