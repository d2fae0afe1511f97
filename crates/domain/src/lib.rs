//! Domain layer for the allocation system.
//!
//! This crate provides the allocation model:
//! - `OrderLine` value object describing a requested quantity of a SKU
//! - `Batch` entity holding purchased stock and its allocations
//! - `Product` aggregate, the only legal way to allocate against its batches
//! - The allocation policy shared by the aggregate and the standalone service

pub mod allocation;

pub use allocation::{
    AllocationError, Batch, OrderLine, Product, allocate, policy::select_batch,
};
pub use common::{BatchReference, OrderId, Sku, Version};
