//! Batch entity.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;
use common::{BatchReference, Sku};
use serde::{Deserialize, Serialize};

use super::OrderLine;

/// A purchased lot of stock for a single SKU.
///
/// A batch without an ETA is already in the warehouse; a batch with an ETA is
/// still in transit. Batches are identified by their reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    reference: BatchReference,
    sku: Sku,
    purchased_quantity: u32,
    eta: Option<NaiveDate>,
    allocations: HashSet<OrderLine>,
}

impl Batch {
    /// Creates a new batch with no allocations.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            purchased_quantity,
            eta,
            allocations: HashSet::new(),
        }
    }

    /// Rebuilds a batch from stored state.
    ///
    /// Allocations are taken as persisted and are not re-checked against
    /// the available quantity.
    pub fn restore(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
        allocations: impl IntoIterator<Item = OrderLine>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            purchased_quantity,
            eta,
            allocations: allocations.into_iter().collect(),
        }
    }

    pub fn reference(&self) -> &BatchReference {
        &self.reference
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn eta(&self) -> Option<NaiveDate> {
        self.eta
    }

    pub fn purchased_quantity(&self) -> u32 {
        self.purchased_quantity
    }

    /// Returns the order lines currently allocated to this batch.
    pub fn allocations(&self) -> impl Iterator<Item = &OrderLine> {
        self.allocations.iter()
    }

    /// Returns true if the line is allocated to this batch.
    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Allocates the line if it fits; otherwise leaves the batch unchanged.
    pub fn allocate(&mut self, line: &OrderLine) {
        if self.can_allocate(line) {
            self.allocations.insert(line.clone());
        }
    }

    /// Removes the line if present. Returns whether anything was removed.
    pub fn deallocate(&mut self, line: &OrderLine) -> bool {
        self.allocations.remove(line)
    }

    /// Returns true if the line has the batch's SKU and fits in the available quantity.
    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == *line.sku() && self.available_quantity() >= line.quantity()
    }

    pub fn allocated_quantity(&self) -> u32 {
        self.allocations.iter().map(OrderLine::quantity).sum()
    }

    pub fn available_quantity(&self) -> u32 {
        self.purchased_quantity
            .saturating_sub(self.allocated_quantity())
    }

    /// Orders batches by allocation preference.
    ///
    /// Batches already in stock come before batches in transit, and batches in
    /// transit are ordered by ETA. Two in-stock batches compare equal.
    pub fn cmp_eta(&self, other: &Self) -> Ordering {
        match (self.eta, other.eta) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Batch {}

impl std::hash::Hash for Batch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_batch_and_line(sku: &str, batch_qty: u32, line_qty: u32) -> (Batch, OrderLine) {
        (
            Batch::new("batch-001", sku, batch_qty, None),
            OrderLine::new("order-123", sku, line_qty).unwrap(),
        )
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn allocating_reduces_available_quantity() {
        let (mut batch, line) = make_batch_and_line("SMALL-TABLE", 20, 2);
        batch.allocate(&line);
        assert_eq!(batch.available_quantity(), 18);
        assert_eq!(batch.allocated_quantity(), 2);
    }

    #[test]
    fn can_allocate_if_available_greater_than_required() {
        let (batch, line) = make_batch_and_line("ELEGANT-LAMP", 20, 2);
        assert!(batch.can_allocate(&line));
    }

    #[test]
    fn cannot_allocate_if_available_smaller_than_required() {
        let (batch, line) = make_batch_and_line("ELEGANT-LAMP", 2, 20);
        assert!(!batch.can_allocate(&line));
    }

    #[test]
    fn can_allocate_if_available_equal_to_required() {
        let (batch, line) = make_batch_and_line("ELEGANT-LAMP", 2, 2);
        assert!(batch.can_allocate(&line));
    }

    #[test]
    fn cannot_allocate_if_skus_do_not_match() {
        let batch = Batch::new("batch-001", "UNCOMFORTABLE-CHAIR", 100, None);
        let line = OrderLine::new("order-123", "EXPENSIVE-TOASTER", 10).unwrap();
        assert!(!batch.can_allocate(&line));

        let mut batch = batch;
        batch.allocate(&line);
        assert_eq!(batch.available_quantity(), 100);
    }

    #[test]
    fn allocation_is_idempotent() {
        let (mut batch, line) = make_batch_and_line("ANGULAR-DESK", 20, 2);
        batch.allocate(&line);
        batch.allocate(&line);
        assert_eq!(batch.available_quantity(), 18);
    }

    #[test]
    fn oversized_allocation_is_a_no_op() {
        let (mut batch, line) = make_batch_and_line("ANGULAR-DESK", 5, 6);
        batch.allocate(&line);
        assert_eq!(batch.available_quantity(), 5);
        assert!(!batch.is_allocated(&line));
    }

    #[test]
    fn available_quantity_never_goes_negative() {
        let mut batch = Batch::new("batch-001", "ANGULAR-DESK", 10, None);
        for (i, qty) in [4, 4, 4, 1, 1, 3].into_iter().enumerate() {
            let line = OrderLine::new(format!("order-{i}"), "ANGULAR-DESK", qty).unwrap();
            batch.allocate(&line);
            assert!(batch.allocated_quantity() <= batch.purchased_quantity());
        }
        assert_eq!(batch.available_quantity(), 0);
        assert_eq!(batch.allocated_quantity(), 10);
    }

    #[test]
    fn can_only_deallocate_allocated_lines() {
        let (mut batch, unallocated_line) = make_batch_and_line("DECORATIVE-TRINKET", 20, 2);
        assert!(!batch.deallocate(&unallocated_line));
        assert_eq!(batch.available_quantity(), 20);
    }

    #[test]
    fn deallocate_releases_quantity() {
        let (mut batch, line) = make_batch_and_line("DECORATIVE-TRINKET", 20, 2);
        batch.allocate(&line);
        assert!(batch.deallocate(&line));
        assert_eq!(batch.available_quantity(), 20);
    }

    #[test]
    fn in_stock_batches_sort_before_shipments() {
        let in_stock = Batch::new("in-stock", "CLOCK", 10, None);
        let shipment = Batch::new("shipment", "CLOCK", 10, Some(date(2011, 1, 1)));
        assert_eq!(in_stock.cmp_eta(&shipment), Ordering::Less);
        assert_eq!(shipment.cmp_eta(&in_stock), Ordering::Greater);
    }

    #[test]
    fn shipments_sort_by_eta() {
        let early = Batch::new("early", "CLOCK", 10, Some(date(2011, 1, 1)));
        let late = Batch::new("late", "CLOCK", 10, Some(date(2011, 1, 2)));
        assert_eq!(early.cmp_eta(&late), Ordering::Less);
        assert_eq!(late.cmp_eta(&early), Ordering::Greater);
        assert_eq!(early.cmp_eta(&early.clone()), Ordering::Equal);
    }

    #[test]
    fn two_in_stock_batches_compare_equal() {
        let a = Batch::new("a", "CLOCK", 10, None);
        let b = Batch::new("b", "CLOCK", 10, None);
        assert_eq!(a.cmp_eta(&b), Ordering::Equal);
        assert_eq!(b.cmp_eta(&a), Ordering::Equal);
    }

    #[test]
    fn batches_are_identified_by_reference() {
        let a = Batch::new("batch-001", "CLOCK", 10, None);
        let b = Batch::new("batch-001", "CLOCK", 99, Some(date(2011, 1, 1)));
        assert_eq!(a, b);
    }

    #[test]
    fn restore_keeps_persisted_allocations() {
        let line = OrderLine::new("order-1", "CLOCK", 3).unwrap();
        let batch = Batch::restore("batch-001", "CLOCK", 10, None, [line.clone()]);
        assert!(batch.is_allocated(&line));
        assert_eq!(batch.available_quantity(), 7);
    }
}
