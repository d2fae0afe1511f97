//! Order line value object.

use common::{OrderId, Sku};
use serde::{Deserialize, Serialize};

use super::AllocationError;

/// A request to allocate a quantity of a SKU to an order.
///
/// Order lines are immutable and compared structurally: two lines with the
/// same order id, SKU and quantity are the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLine {
    order_id: OrderId,
    sku: Sku,
    quantity: u32,
}

impl OrderLine {
    /// Creates a new order line.
    ///
    /// Fails with `InvalidQuantity` when `quantity` is zero.
    pub fn new(
        order_id: impl Into<OrderId>,
        sku: impl Into<Sku>,
        quantity: u32,
    ) -> Result<Self, AllocationError> {
        if quantity == 0 {
            return Err(AllocationError::InvalidQuantity { quantity });
        }

        Ok(Self {
            order_id: order_id.into(),
            sku: sku.into(),
            quantity,
        })
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}
