//! Allocation domain events.
//!
//! Inbound requests (`BatchCreated`, `BatchQuantityChanged`,
//! `AllocationRequest`) and facts recorded by the `Product` aggregate share
//! one taxonomy so that the message bus can route all of them the same way.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events flowing through the allocation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A new batch of stock was purchased.
    BatchCreated(BatchCreated),

    /// The purchased quantity of a batch was corrected.
    BatchQuantityChanged(BatchQuantityChanged),

    /// An order line asks to be allocated.
    AllocationRequest(AllocationRequest),

    /// An order line was allocated to a batch.
    Allocated(Allocated),

    /// An order line was removed from a batch and needs a new home.
    Deallocated(Deallocated),

    /// No batch could take an order line.
    OutOfStock(OutOfStock),
}

/// Routing key of an [`Event`], one per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    BatchCreated,
    BatchQuantityChanged,
    AllocationRequest,
    Allocated,
    Deallocated,
    OutOfStock,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::BatchCreated,
        EventKind::BatchQuantityChanged,
        EventKind::AllocationRequest,
        EventKind::Allocated,
        EventKind::Deallocated,
        EventKind::OutOfStock,
    ];

    /// Returns the stable type name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BatchCreated => "BatchCreated",
            EventKind::BatchQuantityChanged => "BatchQuantityChanged",
            EventKind::AllocationRequest => "AllocationRequest",
            EventKind::Allocated => "Allocated",
            EventKind::Deallocated => "Deallocated",
            EventKind::OutOfStock => "OutOfStock",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// Returns the routing key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BatchCreated(_) => EventKind::BatchCreated,
            Event::BatchQuantityChanged(_) => EventKind::BatchQuantityChanged,
            Event::AllocationRequest(_) => EventKind::AllocationRequest,
            Event::Allocated(_) => EventKind::Allocated,
            Event::Deallocated(_) => EventKind::Deallocated,
            Event::OutOfStock(_) => EventKind::OutOfStock,
        }
    }
}

impl DomainEvent for Event {
    fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Data for BatchCreated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    /// Reference of the new batch.
    pub reference: BatchReference,

    /// Product the batch holds.
    pub sku: Sku,

    /// Purchased quantity.
    pub qty: u32,

    /// Expected arrival; `None` for stock already in the warehouse.
    pub eta: Option<NaiveDate>,
}

/// Data for BatchQuantityChanged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchQuantityChanged {
    /// The batch whose quantity changed.
    pub reference: BatchReference,

    /// New purchased quantity.
    pub qty: u32,
}

/// Data for AllocationRequest event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub orderid: OrderId,
    pub sku: Sku,
    pub qty: u32,
}

/// Data for Allocated event.
///
/// Also the payload published on the `line_allocated` integration topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocated {
    pub orderid: OrderId,
    pub sku: Sku,
    pub batchref: BatchReference,
    pub qty: u32,
}

/// Data for Deallocated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deallocated {
    pub orderid: OrderId,
    pub sku: Sku,
    pub qty: u32,
}

/// Data for OutOfStock event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStock {
    pub sku: Sku,
}

// Convenience constructors for events
impl Event {
    /// Creates a BatchCreated event.
    pub fn batch_created(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        qty: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Event::BatchCreated(BatchCreated {
            reference: reference.into(),
            sku: sku.into(),
            qty,
            eta,
        })
    }

    /// Creates a BatchQuantityChanged event.
    pub fn batch_quantity_changed(reference: impl Into<BatchReference>, qty: u32) -> Self {
        Event::BatchQuantityChanged(BatchQuantityChanged {
            reference: reference.into(),
            qty,
        })
    }

    /// Creates an AllocationRequest event.
    pub fn allocation_request(orderid: impl Into<OrderId>, sku: impl Into<Sku>, qty: u32) -> Self {
        Event::AllocationRequest(AllocationRequest {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        })
    }

    /// Creates an Allocated event.
    pub fn allocated(orderid: OrderId, sku: Sku, batchref: BatchReference, qty: u32) -> Self {
        Event::Allocated(Allocated {
            orderid,
            sku,
            batchref,
            qty,
        })
    }

    /// Creates a Deallocated event.
    pub fn deallocated(orderid: OrderId, sku: Sku, qty: u32) -> Self {
        Event::Deallocated(Deallocated { orderid, sku, qty })
    }

    /// Creates an OutOfStock event.
    pub fn out_of_stock(sku: Sku) -> Self {
        Event::OutOfStock(OutOfStock { sku })
    }
}
