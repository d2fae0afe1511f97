//! Service error types.

use common::Sku;
use domain::AllocationError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the application services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No product exists for the requested SKU.
    #[error("Invalid sku {0}")]
    InvalidSku(Sku),

    /// The product rejected the change, e.g. because it is out of stock.
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// The unit of work failed to load or persist.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Returns true for errors caused by the caller's input rather than the
    /// state of the store.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::InvalidSku(_) | ServiceError::Allocation(_))
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
