use common::{BatchReference, Sku};
use thiserror::Error;

/// Errors that can occur when reading or writing products.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another unit of work holds or changed the product.
    ///
    /// Raised on lock timeouts, version mismatches at commit and
    /// serialization failures. Retrying the whole unit of work is safe.
    #[error("Concurrency conflict for product {sku}: {reason}")]
    ConcurrencyConflict { sku: Sku, reason: String },

    /// A product with this sku already exists.
    #[error("Product already exists: {0}")]
    Duplicate(Sku),

    /// The batch reference is already used by a product of another sku.
    #[error("Batch reference {reference} already belongs to a product other than {sku}")]
    DuplicateBatch { reference: BatchReference, sku: Sku },

    /// The unit of work was already committed or rolled back.
    #[error("Unit of work is closed")]
    Closed,

    /// Stored data cannot be turned back into a product.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn conflict(sku: &Sku, reason: impl Into<String>) -> Self {
        metrics::counter!("store_conflicts_total").increment(1);
        StoreError::ConcurrencyConflict {
            sku: sku.clone(),
            reason: reason.into(),
        }
    }

    /// Returns true if the failed unit of work may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
