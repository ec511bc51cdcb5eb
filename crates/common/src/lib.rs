//! Shared identifier and version types used across the allocation service.

mod types;

pub use types::{BatchReference, OrderId, Sku, Version};
