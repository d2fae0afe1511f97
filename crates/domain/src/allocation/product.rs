//! Product aggregate implementation.

use common::{BatchReference, Sku, Version};
use serde::{Deserialize, Serialize};

use super::{AllocationError, Batch, OrderLine, policy};

/// Product aggregate root.
///
/// Groups every batch of one SKU. Allocation goes through the product so the
/// choice of batch and the version bump happen together. The version acts as
/// an optimistic-concurrency token for the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    sku: Sku,
    batches: Vec<Batch>,
    version: Version,
}

impl Product {
    /// Creates a product at the initial version.
    ///
    /// Batches whose SKU differs from `sku` are rejected.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Result<Self, AllocationError> {
        Self::restore(sku, batches, Version::initial())
    }

    /// Rebuilds a product from stored state.
    pub fn restore(
        sku: impl Into<Sku>,
        batches: Vec<Batch>,
        version: Version,
    ) -> Result<Self, AllocationError> {
        let sku = sku.into();
        if let Some(batch) = batches.iter().find(|b| *b.sku() != sku) {
            return Err(AllocationError::SkuMismatch {
                expected: sku,
                actual: batch.sku().clone(),
            });
        }

        Ok(Self {
            sku,
            batches,
            version,
        })
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the batches in insertion order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Looks up a batch by reference.
    pub fn batch(&self, reference: &BatchReference) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Total quantity still available across all batches.
    pub fn available_quantity(&self) -> u64 {
        self.batches
            .iter()
            .map(|b| u64::from(b.available_quantity()))
            .sum()
    }

    /// Appends a batch to the product.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), AllocationError> {
        if *batch.sku() != self.sku {
            return Err(AllocationError::SkuMismatch {
                expected: self.sku.clone(),
                actual: batch.sku().clone(),
            });
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Allocates the line to the preferred batch and bumps the version.
    ///
    /// A line that is already allocated keeps its batch: its reference is
    /// returned and the version stays as it is. On `OutOfStock` neither the
    /// batches nor the version change.
    pub fn allocate(&mut self, line: &OrderLine) -> Result<BatchReference, AllocationError> {
        if let Some(holder) = self.batches.iter().find(|b| b.is_allocated(line)) {
            return Ok(holder.reference().clone());
        }

        let reference = policy::allocate(line, &mut self.batches)?;
        self.version = self.version.next();

        tracing::debug!(
            sku = %self.sku,
            order_id = %line.order_id(),
            batch = %reference,
            version = %self.version,
            "order line allocated"
        );

        Ok(reference)
    }

    /// Removes the line from whichever batch holds it.
    ///
    /// Returns the reference of that batch, or `None` if the line was not
    /// allocated. The version is bumped only when something changed.
    pub fn deallocate(&mut self, line: &OrderLine) -> Option<BatchReference> {
        let batch = self.batches.iter_mut().find(|b| b.is_allocated(line))?;
        batch.deallocate(line);
        let reference = batch.reference().clone();
        self.version = self.version.next();
        Some(reference)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, month, day)
    }

    fn line(order_id: &str, sku: &str, qty: u32) -> OrderLine {
        OrderLine::new(order_id, sku, qty).unwrap()
    }

    #[test]
    fn new_product_starts_at_version_zero() {
        let product = Product::new("TABLE", vec![]).unwrap();
        assert_eq!(product.version(), Version::initial());
        assert!(product.batches().is_empty());
    }

    #[test]
    fn allocates_from_in_stock_batch() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("B1", "TABLE", 20, None)]).unwrap();

        let reference = product.allocate(&line("O1", "TABLE", 2)).unwrap();

        assert_eq!(reference, "B1");
        let batch = product.batch(&reference).unwrap();
        assert_eq!(batch.available_quantity(), 18);
    }

    #[test]
    fn allocates_to_earliest_shipment() {
        let mut product = Product::new(
            "SOFA",
            vec![
                Batch::new("B-late", "SOFA", 100, date(2011, 1, 2)),
                Batch::new("B-early", "SOFA", 100, date(2011, 1, 1)),
            ],
        )
        .unwrap();

        let reference = product.allocate(&line("O1", "SOFA", 3)).unwrap();

        assert_eq!(reference, "B-early");
    }

    #[test]
    fn allocation_does_not_reorder_batches() {
        let mut product = Product::new(
            "SOFA",
            vec![
                Batch::new("B-late", "SOFA", 100, date(2011, 1, 2)),
                Batch::new("B-early", "SOFA", 100, date(2011, 1, 1)),
            ],
        )
        .unwrap();

        product.allocate(&line("O1", "SOFA", 3)).unwrap();

        let references: Vec<_> = product.batches().iter().map(|b| b.reference().as_str()).collect();
        assert_eq!(references, ["B-late", "B-early"]);
    }

    #[test]
    fn increments_version_on_each_allocation() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("B1", "TABLE", 20, None)]).unwrap();

        product.allocate(&line("O1", "TABLE", 2)).unwrap();
        product.allocate(&line("O2", "TABLE", 2)).unwrap();

        assert_eq!(product.version(), Version::new(2));
    }

    #[test]
    fn out_of_stock_after_batch_is_exhausted() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("B1", "TABLE", 10, None)]).unwrap();

        product.allocate(&line("O1", "TABLE", 10)).unwrap();
        assert_eq!(product.available_quantity(), 0);

        let err = product.allocate(&line("O2", "TABLE", 1)).unwrap_err();
        assert_eq!(err, AllocationError::OutOfStock { sku: "TABLE".into() });
        assert!(err.to_string().contains("TABLE"));
    }

    #[test]
    fn failed_allocation_changes_nothing() {
        let mut product = Product::new(
            "TABLE",
            vec![
                Batch::new("B1", "TABLE", 5, None),
                Batch::new("B2", "TABLE", 5, date(2011, 1, 1)),
            ],
        )
        .unwrap();
        product.allocate(&line("O1", "TABLE", 1)).unwrap();
        let before: Vec<u32> = product
            .batches()
            .iter()
            .map(Batch::available_quantity)
            .collect();

        let result = product.allocate(&line("O2", "TABLE", 6));

        assert!(result.is_err());
        let after: Vec<u32> = product
            .batches()
            .iter()
            .map(Batch::available_quantity)
            .collect();
        assert_eq!(before, after);
        assert_eq!(product.version(), Version::new(1));
    }

    #[test]
    fn rejects_batches_for_other_skus() {
        let mut product = Product::new("TABLE", vec![]).unwrap();

        let result = product.add_batch(Batch::new("B1", "CHAIR", 10, None));

        assert_eq!(
            result,
            Err(AllocationError::SkuMismatch {
                expected: "TABLE".into(),
                actual: "CHAIR".into(),
            })
        );
        assert!(product.batches().is_empty());
        assert!(Product::new("TABLE", vec![Batch::new("B1", "CHAIR", 1, None)]).is_err());
    }

    #[test]
    fn deallocate_returns_batch_and_frees_stock() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("B1", "TABLE", 10, None)]).unwrap();
        let order_line = line("O1", "TABLE", 4);
        product.allocate(&order_line).unwrap();

        assert_eq!(product.deallocate(&order_line), Some("B1".into()));
        assert_eq!(product.available_quantity(), 10);
        assert_eq!(product.version(), Version::new(2));
    }

    #[test]
    fn deallocating_unknown_line_is_a_no_op() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("B1", "TABLE", 10, None)]).unwrap();

        assert_eq!(product.deallocate(&line("O1", "TABLE", 4)), None);
        assert_eq!(product.available_quantity(), 10);
        assert_eq!(product.version(), Version::initial());
    }

    #[test]
    fn aggregate_and_standalone_policy_agree() {
        let batches = vec![
            Batch::new("ship-2", "LAMP", 10, date(2011, 1, 3)),
            Batch::new("ship-1", "LAMP", 10, date(2011, 1, 2)),
            Batch::new("stock", "LAMP", 2, None),
        ];
        let order_line = line("O1", "LAMP", 3);

        let mut product = Product::new("LAMP", batches.clone()).unwrap();
        let via_product = product.allocate(&order_line).unwrap();
        let via_service = policy::allocate(&order_line, &mut batches.clone()).unwrap();

        assert_eq!(via_product, via_service);
        assert_eq!(via_product, "ship-1");
    }

    #[test]
    fn allocating_same_line_twice_is_idempotent() {
        let mut product = Product::new(
            "TABLE",
            vec![
                Batch::new("B1", "TABLE", 10, None),
                Batch::new("B2", "TABLE", 10, date(2011, 1, 1)),
            ],
        )
        .unwrap();
        let order_line = line("O1", "TABLE", 6);

        let first = product.allocate(&order_line).unwrap();
        let second = product.allocate(&order_line).unwrap();

        assert_eq!(first, "B1");
        assert_eq!(second, first);
        assert_eq!(product.version(), Version::new(1));
        assert_eq!(product.available_quantity(), 14);
        let holders = product
            .batches()
            .iter()
            .filter(|b| b.is_allocated(&order_line))
            .count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn held_line_stays_put_when_a_better_batch_arrives() {
        let mut product =
            Product::new("TABLE", vec![Batch::new("ship", "TABLE", 10, date(2011, 1, 1))])
                .unwrap();
        let order_line = line("O1", "TABLE", 2);
        product.allocate(&order_line).unwrap();
        product
            .add_batch(Batch::new("stock", "TABLE", 10, None))
            .unwrap();

        assert_eq!(product.allocate(&order_line).unwrap(), "ship");
        assert_eq!(product.available_quantity(), 18);
    }
}
