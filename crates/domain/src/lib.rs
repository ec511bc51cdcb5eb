//! Domain layer for the allocation service.
//!
//! This crate holds the pure decision logic:
//! - `Aggregate` and `DomainEvent` traits used by the persistence layer
//! - the `Product` aggregate with its `Batch`es and `OrderLine`s
//! - the `Event` taxonomy recorded by the aggregate and consumed by handlers
//!
//! Nothing in here performs I/O.

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod events;
pub mod product;

pub use aggregate::{Aggregate, DomainEvent};
pub use batch::{Batch, OrderLine};
pub use common::{BatchReference, OrderId, Sku, Version};
pub use error::AllocationError;
pub use events::{
    Allocated, AllocationRequest, BatchCreated, BatchQuantityChanged, Deallocated, Event,
    EventKind, OutOfStock,
};
pub use product::Product;
