//! Identifier types shared by the domain, store and service crates.

pub mod types;

pub use types::{BatchReference, OrderId, Sku, Version};
