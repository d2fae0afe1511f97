use async_trait::async_trait;
use common::Sku;
use domain::Product;

use crate::Result;

/// Loads and registers product aggregates inside a unit of work.
///
/// Implementations keep every product they hand out in an identity map:
/// repeated `get` calls for the same SKU return the same in-memory aggregate,
/// and the owning unit of work persists the changes made to it on commit.
#[async_trait]
pub trait ProductRepository: Send {
    /// Looks up a product with all of its batches.
    ///
    /// Returns `None` for an unknown SKU.
    async fn get<'a>(&'a mut self, sku: &Sku) -> Result<Option<&'a mut Product>>;

    /// Registers a new product for persistence.
    ///
    /// Fails with `DuplicateProduct` if the SKU is already known, either here
    /// or in storage. Storage-level duplicates may only surface on commit.
    async fn add(&mut self, product: Product) -> Result<()>;
}
