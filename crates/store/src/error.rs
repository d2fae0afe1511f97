use common::{BatchReference, Sku, Version};
use thiserror::Error;

/// Errors that can occur when interacting with a product store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The unit of work was used outside an entered scope.
    #[error("Unit of work is not open: cannot {operation} outside an entered scope")]
    NotInScope { operation: &'static str },

    /// The unit of work was entered twice without exiting.
    #[error("Unit of work is already open")]
    AlreadyInScope,

    /// A product with this SKU is already stored.
    #[error("Product already exists: {0}")]
    DuplicateProduct(Sku),

    /// A batch with this reference is already stored.
    #[error("Batch reference already exists: {0}")]
    DuplicateBatch(BatchReference),

    /// The product changed in storage since it was loaded.
    #[error(
        "Concurrency conflict for product {sku}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        sku: Sku,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
