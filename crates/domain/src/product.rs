//! Product aggregate.

use common::{BatchReference, OrderId, Sku, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::batch::{Batch, OrderLine};
use crate::error::AllocationError;
use crate::events::Event;

/// Product aggregate root.
///
/// Owns every batch of one sku and makes all allocation decisions for it.
/// Mutations record events in an internal buffer that the unit of work
/// drains when its scope ends; the buffer is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Identity key.
    sku: Sku,

    /// Batches of this sku, in the order they were added.
    batches: Vec<Batch>,

    /// Bumped once per successful allocation.
    #[serde(default)]
    version_number: Version,

    /// Pending events, oldest first.
    #[serde(skip)]
    events: Vec<Event>,
}

impl Aggregate for Product {
    type Key = Sku;
    type Event = Event;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn key(&self) -> &Sku {
        &self.sku
    }

    fn version(&self) -> Version {
        self.version_number
    }

    fn pending_events(&self) -> &[Event] {
        &self.events
    }

    fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl Product {
    /// Creates a product at version 0.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Self {
        Self::restore(sku.into(), batches, Version::initial())
    }

    /// Rebuilds a product from persisted state, with no pending events.
    pub fn restore(sku: Sku, batches: Vec<Batch>, version_number: Version) -> Self {
        Self {
            sku,
            batches,
            version_number,
            events: Vec::new(),
        }
    }
}

// Query methods
impl Product {
    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn version_number(&self) -> Version {
        self.version_number
    }

    /// Returns the batch with the given reference.
    pub fn batch(&self, reference: &BatchReference) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Returns true if one of the batches has this reference.
    pub fn has_batch(&self, reference: &BatchReference) -> bool {
        self.batch(reference).is_some()
    }

    /// Returns the batch currently holding a line of this order, if any.
    pub fn allocation_for(&self, orderid: &OrderId) -> Option<&BatchReference> {
        self.batches
            .iter()
            .find(|b| b.allocations().iter().any(|l| &l.orderid == orderid))
            .map(Batch::reference)
    }

    /// Sum of available quantity over all batches.
    pub fn available_quantity(&self) -> i64 {
        self.batches.iter().map(Batch::available_quantity).sum()
    }
}

// Command methods
impl Product {
    /// Adds a batch of this product's sku.
    ///
    /// A batch whose reference is already present is ignored so that a
    /// re-delivered `BatchCreated` does not duplicate stock.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), AllocationError> {
        if batch.sku() != &self.sku {
            return Err(AllocationError::SkuMismatch {
                expected: self.sku.clone(),
                actual: batch.sku().clone(),
            });
        }

        if !self.has_batch(batch.reference()) {
            self.batches.push(batch);
        }
        Ok(())
    }

    /// Allocates the line to the best batch and returns its reference.
    ///
    /// Warehouse stock (no eta) is preferred, then the earliest eta. On
    /// failure an `OutOfStock` event is recorded and nothing else changes.
    /// An order already holding the same quantity of this sku keeps its
    /// allocation; asking again with another quantity is rejected.
    pub fn allocate(&mut self, line: OrderLine) -> Result<BatchReference, AllocationError> {
        if line.qty == 0 {
            return Err(AllocationError::InvalidQuantity {
                orderid: line.orderid,
                qty: line.qty,
            });
        }

        for batch in &self.batches {
            let held = batch
                .allocations()
                .iter()
                .find(|l| l.orderid == line.orderid && l.sku == line.sku);
            match held {
                Some(held) if held.qty == line.qty => return Ok(batch.reference().clone()),
                Some(held) => {
                    return Err(AllocationError::QuantityMismatch {
                        orderid: line.orderid,
                        sku: line.sku,
                        allocated: held.qty,
                        requested: line.qty,
                    });
                }
                None => {}
            }
        }

        let Some(index) = self.select_batch(&line) else {
            tracing::debug!(
                sku = %line.sku,
                orderid = %line.orderid,
                qty = line.qty,
                "out of stock"
            );
            self.events.push(Event::out_of_stock(line.sku.clone()));
            return Err(AllocationError::OutOfStock { sku: line.sku });
        };

        let batch = &mut self.batches[index];
        let reference = batch.reference().clone();
        self.events.push(Event::allocated(
            line.orderid.clone(),
            line.sku.clone(),
            reference.clone(),
            line.qty,
        ));
        batch.allocate(line);
        self.version_number = self.version_number.next();

        Ok(reference)
    }

    /// Sets a batch's purchased quantity, deallocating lines until the
    /// batch is no longer over-committed.
    ///
    /// Lines are removed earliest-allocated first; each removal records a
    /// `Deallocated` event.
    pub fn change_batch_quantity(
        &mut self,
        reference: &BatchReference,
        qty: u32,
    ) -> Result<(), AllocationError> {
        let batch = self
            .batches
            .iter_mut()
            .find(|b| b.reference() == reference)
            .ok_or_else(|| AllocationError::UnknownBatch {
                reference: reference.clone(),
            })?;

        batch.set_purchased_quantity(qty);
        while batch.available_quantity() < 0 {
            let Some(line) = batch.deallocate_one() else {
                break;
            };
            self.events
                .push(Event::deallocated(line.orderid, line.sku, line.qty));
        }

        Ok(())
    }

    /// Index of the first batch, in precedence order, that can take the line.
    fn select_batch(&self, line: &OrderLine) -> Option<usize> {
        let mut candidates: Vec<usize> = (0..self.batches.len()).collect();
        // `None < Some(_)`, so warehouse stock sorts ahead of any eta.
        candidates.sort_by(|&a, &b| {
            let (a, b) = (&self.batches[a], &self.batches[b]);
            a.eta()
                .cmp(&b.eta())
                .then_with(|| a.reference().cmp(b.reference()))
        });
        candidates
            .into_iter()
            .find(|&index| self.batches[index].can_allocate(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Allocated, Deallocated, OutOfStock};
    use chrono::{Days, NaiveDate};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn tomorrow() -> NaiveDate {
        today() + Days::new(1)
    }

    fn later() -> NaiveDate {
        today() + Days::new(10)
    }

    #[test]
    fn test_prefers_warehouse_batches_to_shipments() {
        let in_stock = Batch::new("in-stock-batch", "RETRO-CLOCK", 100, None);
        let shipment = Batch::new("shipment-batch", "RETRO-CLOCK", 100, Some(tomorrow()));
        let mut product = Product::new("RETRO-CLOCK", vec![shipment, in_stock]);

        let reference = product
            .allocate(OrderLine::new("oref", "RETRO-CLOCK", 10))
            .unwrap();

        assert_eq!(reference, BatchReference::new("in-stock-batch"));
        let in_stock = product.batch(&"in-stock-batch".into()).unwrap();
        let shipment = product.batch(&"shipment-batch".into()).unwrap();
        assert_eq!(in_stock.available_quantity(), 90);
        assert_eq!(shipment.available_quantity(), 100);
    }

    #[test]
    fn test_prefers_earlier_batches() {
        let earliest = Batch::new("speedy-batch", "MINIMALIST-SPOON", 100, Some(today()));
        let medium = Batch::new("normal-batch", "MINIMALIST-SPOON", 100, Some(tomorrow()));
        let latest = Batch::new("slow-batch", "MINIMALIST-SPOON", 100, Some(later()));
        let mut product = Product::new("MINIMALIST-SPOON", vec![medium, latest, earliest]);

        let reference = product
            .allocate(OrderLine::new("order1", "MINIMALIST-SPOON", 10))
            .unwrap();

        assert_eq!(reference, BatchReference::new("speedy-batch"));
        assert_eq!(
            product.batch(&"speedy-batch".into()).unwrap().available_quantity(),
            90
        );
        assert_eq!(
            product.batch(&"normal-batch".into()).unwrap().available_quantity(),
            100
        );
        assert_eq!(
            product.batch(&"slow-batch".into()).unwrap().available_quantity(),
            100
        );
    }

    #[test]
    fn test_skips_batches_without_enough_stock() {
        let small = Batch::new("small", "LAMP", 5, None);
        let big = Batch::new("big", "LAMP", 50, Some(tomorrow()));
        let mut product = Product::new("LAMP", vec![small, big]);

        let reference = product.allocate(OrderLine::new("o1", "LAMP", 10)).unwrap();
        assert_eq!(reference, BatchReference::new("big"));
    }

    #[test]
    fn test_records_allocated_event() {
        let batch = Batch::new("b1", "LAMP", 10, None);
        let mut product = Product::new("LAMP", vec![batch]);

        product.allocate(OrderLine::new("o1", "LAMP", 3)).unwrap();

        assert_eq!(
            product.pending_events(),
            &[Event::Allocated(Allocated {
                orderid: "o1".into(),
                sku: "LAMP".into(),
                batchref: "b1".into(),
                qty: 3,
            })]
        );
    }

    #[test]
    fn test_records_out_of_stock_event_if_cannot_allocate() {
        let batch = Batch::new("batch1", "SMALL-FORK", 10, Some(today()));
        let mut product = Product::new("SMALL-FORK", vec![batch]);
        product
            .allocate(OrderLine::new("order1", "SMALL-FORK", 10))
            .unwrap();
        let version_before = product.version_number();
        let _ = product.take_events();

        let result = product.allocate(OrderLine::new("order2", "SMALL-FORK", 1));

        assert!(matches!(result, Err(AllocationError::OutOfStock { .. })));
        assert_eq!(
            product.pending_events(),
            &[Event::OutOfStock(OutOfStock {
                sku: "SMALL-FORK".into()
            })]
        );
        assert_eq!(product.version_number(), version_before);
        assert_eq!(product.batches()[0].allocations().len(), 1);
    }

    #[test]
    fn test_out_of_stock_when_total_stock_insufficient() {
        let a = Batch::new("a", "CUSHION", 4, None);
        let b = Batch::new("b", "CUSHION", 4, Some(tomorrow()));
        let mut product = Product::new("CUSHION", vec![a, b]);

        let result = product.allocate(OrderLine::new("o1", "CUSHION", 5));

        assert_eq!(
            result,
            Err(AllocationError::OutOfStock {
                sku: "CUSHION".into()
            })
        );
        assert_eq!(product.version_number(), Version::initial());
        assert!(product.batches().iter().all(|b| b.allocations().is_empty()));
    }

    #[test]
    fn test_increments_version_number() {
        let line = OrderLine::new("oref", "SCANDI-PEN", 10);
        let batch = Batch::new("b1", "SCANDI-PEN", 100, None);
        let mut product = Product::new("SCANDI-PEN", vec![batch]);
        product.version_number = Version::new(7);

        product.allocate(line).unwrap();

        assert_eq!(product.version_number(), Version::new(8));
    }

    #[test]
    fn test_reallocating_same_line_is_noop() {
        let mut product = Product::new("VASE", vec![Batch::new("b1", "VASE", 10, None)]);
        let line = OrderLine::new("o1", "VASE", 2);

        let first = product.allocate(line.clone()).unwrap();
        let _ = product.take_events();
        let second = product.allocate(line).unwrap();

        assert_eq!(first, second);
        assert_eq!(product.version_number(), Version::new(1));
        assert!(product.pending_events().is_empty());
        assert_eq!(product.available_quantity(), 8);
    }

    #[test]
    fn test_reallocating_order_with_other_quantity_is_rejected() {
        let mut product = Product::new("VASE", vec![Batch::new("b1", "VASE", 10, None)]);
        product.allocate(OrderLine::new("o1", "VASE", 2)).unwrap();
        let _ = product.take_events();

        let result = product.allocate(OrderLine::new("o1", "VASE", 5));

        assert_eq!(
            result,
            Err(AllocationError::QuantityMismatch {
                orderid: "o1".into(),
                sku: "VASE".into(),
                allocated: 2,
                requested: 5,
            })
        );
        assert_eq!(product.version_number(), Version::new(1));
        assert!(product.pending_events().is_empty());
        assert_eq!(product.available_quantity(), 8);
    }

    #[test]
    fn test_zero_quantity_line_is_rejected() {
        let mut product = Product::new("VASE", vec![Batch::new("b1", "VASE", 10, None)]);

        let result = product.allocate(OrderLine::new("o1", "VASE", 0));

        assert!(matches!(result, Err(AllocationError::InvalidQuantity { qty: 0, .. })));
        assert_eq!(product.version_number(), Version::initial());
        assert!(product.pending_events().is_empty());
        assert!(product.batches()[0].allocations().is_empty());
    }

    #[test]
    fn test_warehouse_then_shipment_scenario() {
        let b1 = Batch::new("B1", "SOFA", 10, None);
        let b2 = Batch::new("B2", "SOFA", 10, Some(later()));
        let mut product = Product::new("SOFA", vec![b1, b2]);

        assert_eq!(
            product.allocate(OrderLine::new("o1", "SOFA", 10)).unwrap(),
            BatchReference::new("B1")
        );
        assert_eq!(
            product.allocate(OrderLine::new("o2", "SOFA", 10)).unwrap(),
            BatchReference::new("B2")
        );
        assert_eq!(product.version_number(), Version::new(2));
    }

    #[test]
    fn test_change_batch_quantity_deallocates_until_non_negative() {
        let mut product = Product::new("RUG", vec![Batch::new("b1", "RUG", 20, None)]);
        product.allocate(OrderLine::new("o1", "RUG", 8)).unwrap();
        product.allocate(OrderLine::new("o2", "RUG", 8)).unwrap();
        product.allocate(OrderLine::new("o3", "RUG", 4)).unwrap();
        let _ = product.take_events();

        product.change_batch_quantity(&"b1".into(), 10).unwrap();

        assert_eq!(
            product.pending_events(),
            &[
                Event::Deallocated(Deallocated {
                    orderid: "o1".into(),
                    sku: "RUG".into(),
                    qty: 8,
                }),
                Event::Deallocated(Deallocated {
                    orderid: "o2".into(),
                    sku: "RUG".into(),
                    qty: 8,
                }),
            ]
        );
        let batch = product.batch(&"b1".into()).unwrap();
        assert_eq!(batch.available_quantity(), 6);
        assert_eq!(batch.allocations(), &[OrderLine::new("o3", "RUG", 4)]);
    }

    #[test]
    fn test_change_batch_quantity_without_overcommit_records_nothing() {
        let mut product = Product::new("RUG", vec![Batch::new("b1", "RUG", 20, None)]);
        product.allocate(OrderLine::new("o1", "RUG", 5)).unwrap();
        let _ = product.take_events();

        product.change_batch_quantity(&"b1".into(), 5).unwrap();

        assert!(product.pending_events().is_empty());
        assert_eq!(product.batch(&"b1".into()).unwrap().available_quantity(), 0);
    }

    #[test]
    fn test_change_quantity_of_unknown_batch_fails() {
        let mut product = Product::new("RUG", vec![]);
        let result = product.change_batch_quantity(&"nope".into(), 5);
        assert!(matches!(result, Err(AllocationError::UnknownBatch { .. })));
    }

    #[test]
    fn test_add_batch_rejects_other_sku_and_ignores_duplicates() {
        let mut product = Product::new("CHAIR", vec![]);
        product.add_batch(Batch::new("b1", "CHAIR", 10, None)).unwrap();
        product.add_batch(Batch::new("b1", "CHAIR", 99, None)).unwrap();

        assert_eq!(product.batches().len(), 1);
        assert_eq!(product.batches()[0].purchased_quantity(), 10);

        let result = product.add_batch(Batch::new("b2", "TABLE", 10, None));
        assert!(matches!(result, Err(AllocationError::SkuMismatch { .. })));
    }

    #[test]
    fn test_allocation_for_finds_order() {
        let mut product = Product::new("MUG", vec![Batch::new("b1", "MUG", 10, None)]);
        product.allocate(OrderLine::new("o1", "MUG", 1)).unwrap();

        assert_eq!(
            product.allocation_for(&"o1".into()),
            Some(&BatchReference::new("b1"))
        );
        assert_eq!(product.allocation_for(&"o2".into()), None);
    }

    #[test]
    fn test_serialization_skips_pending_events() {
        let mut product = Product::new("MUG", vec![Batch::new("b1", "MUG", 10, None)]);
        product.allocate(OrderLine::new("o1", "MUG", 1)).unwrap();

        let json = serde_json::to_string(&product).unwrap();
        let deserialized: Product = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.sku(), product.sku());
        assert_eq!(deserialized.version_number(), Version::new(1));
        assert_eq!(deserialized.batches()[0].allocations().len(), 1);
        assert!(deserialized.pending_events().is_empty());
    }
}
