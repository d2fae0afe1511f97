//! Allocation aggregate and related types.

mod batch;
mod order_line;
pub mod policy;
mod product;

pub use batch::Batch;
pub use order_line::OrderLine;
pub use policy::allocate;
pub use product::Product;

use common::Sku;
use thiserror::Error;

/// Errors that can occur during allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// No batch of the product can satisfy the order line.
    #[error("Article {sku} is out of stock")]
    OutOfStock { sku: Sku },

    /// Order lines must request at least one unit.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A batch was offered to a product of a different SKU.
    #[error("Batch for {actual} cannot be added to product {expected}")]
    SkuMismatch { expected: Sku, actual: Sku },
}
