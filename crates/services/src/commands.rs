//! Commands accepted by the application services.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};

/// Command to register a new batch of stock for a SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddBatch {
    /// Unique reference of the batch.
    pub reference: BatchReference,

    /// The SKU the batch holds.
    pub sku: Sku,

    /// Units purchased.
    pub quantity: u32,

    /// Expected arrival date, or `None` if the batch is already in stock.
    pub eta: Option<NaiveDate>,
}

impl AddBatch {
    /// Creates a new AddBatch command.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        quantity: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            quantity,
            eta,
        }
    }
}

/// Command to allocate an order line to the best available batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocate {
    /// The order the line belongs to.
    pub order_id: OrderId,

    /// The SKU being ordered.
    pub sku: Sku,

    /// Units ordered.
    pub quantity: u32,
}

impl Allocate {
    /// Creates a new Allocate command.
    pub fn new(order_id: impl Into<OrderId>, sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        }
    }
}
