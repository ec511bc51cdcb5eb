//! Domain error types.

use common::{BatchReference, OrderId, Sku};
use thiserror::Error;

/// Errors raised by the `Product` aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// No batch can take the requested quantity.
    #[error("Out of stock for sku {sku}")]
    OutOfStock { sku: Sku },

    /// The batch reference does not belong to this product.
    #[error("Unknown batch reference: {reference}")]
    UnknownBatch { reference: BatchReference },

    /// Order lines must ask for at least one unit.
    #[error("Invalid quantity {qty} for order {orderid}")]
    InvalidQuantity { orderid: OrderId, qty: u32 },

    /// The order already holds stock of this sku with a different quantity.
    #[error("Order {orderid} already holds {allocated} of {sku}, cannot reallocate as {requested}")]
    QuantityMismatch {
        orderid: OrderId,
        sku: Sku,
        allocated: u32,
        requested: u32,
    },

    /// A batch for another sku was offered to this product.
    #[error("Batch sku {actual} does not match product sku {expected}")]
    SkuMismatch { expected: Sku, actual: Sku },
}
