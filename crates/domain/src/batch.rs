//! Batches of purchased stock and the order lines allocated to them.

use chrono::NaiveDate;
use common::{BatchReference, OrderId, Sku};
use serde::{Deserialize, Serialize};

/// A request to allocate a quantity of a sku to an order.
///
/// Value object: two lines with the same fields are the same line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLine {
    pub orderid: OrderId,
    pub sku: Sku,
    pub qty: u32,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(orderid: impl Into<OrderId>, sku: impl Into<Sku>, qty: u32) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }
}

/// A purchased lot of one sku.
///
/// Batches are entities: two batches are equal when their references are.
/// Allocations keep the order they were made in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    reference: BatchReference,
    sku: Sku,
    purchased_quantity: u32,
    eta: Option<NaiveDate>,
    allocations: Vec<OrderLine>,
}

impl Batch {
    /// Creates a batch with no allocations.
    pub fn new(
        reference: impl Into<BatchReference>,
        sku: impl Into<Sku>,
        qty: u32,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            purchased_quantity: qty,
            eta,
            allocations: Vec::new(),
        }
    }

    /// Rebuilds a batch from persisted state.
    ///
    /// Duplicate lines are collapsed; the first occurrence wins.
    pub fn restore(
        reference: BatchReference,
        sku: Sku,
        purchased_quantity: u32,
        eta: Option<NaiveDate>,
        allocations: impl IntoIterator<Item = OrderLine>,
    ) -> Self {
        let mut batch = Self {
            reference,
            sku,
            purchased_quantity,
            eta,
            allocations: Vec::new(),
        };
        for line in allocations {
            batch.allocate(line);
        }
        batch
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

    /// Allocated lines, oldest first.
    pub fn allocations(&self) -> &[OrderLine] {
        &self.allocations
    }

    /// Sum of the quantities of all allocated lines.
    pub fn allocated_quantity(&self) -> i64 {
        self.allocations.iter().map(|line| i64::from(line.qty)).sum()
    }

    /// Purchased minus allocated quantity.
    ///
    /// Negative only transiently, after the purchased quantity was reduced
    /// below what is already allocated.
    pub fn available_quantity(&self) -> i64 {
        i64::from(self.purchased_quantity) - self.allocated_quantity()
    }

    /// True if the line is for this batch's sku and fits in what is left.
    pub fn can_allocate(&self, line: &OrderLine) -> bool {
        self.sku == line.sku && self.available_quantity() >= i64::from(line.qty)
    }

    /// Returns true if this exact line is allocated here.
    pub fn is_allocated(&self, line: &OrderLine) -> bool {
        self.allocations.contains(line)
    }

    /// Adds the line. Adding a line twice has no effect.
    pub fn allocate(&mut self, line: OrderLine) {
        if !self.is_allocated(&line) {
            self.allocations.push(line);
        }
    }

    /// Removes the line if present, returning whether it was.
    pub fn deallocate(&mut self, line: &OrderLine) -> bool {
        match self.allocations.iter().position(|l| l == line) {
            Some(index) => {
                self.allocations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes the earliest allocated line.
    pub fn deallocate_one(&mut self) -> Option<OrderLine> {
        if self.allocations.is_empty() {
            None
        } else {
            Some(self.allocations.remove(0))
        }
    }

    pub(crate) fn set_purchased_quantity(&mut self, qty: u32) {
        self.purchased_quantity = qty;
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
            OrderLine::new("order-123", sku, line_qty),
        )
    }

    #[test]
    fn test_allocating_reduces_available_quantity() {
        let (mut batch, line) = make_batch_and_line("SMALL-TABLE", 20, 2);
        batch.allocate(line);
        assert_eq!(batch.available_quantity(), 18);
        assert_eq!(batch.allocated_quantity(), 2);
    }

    #[test]
    fn test_can_allocate_if_available_greater_than_required() {
        let (large_batch, small_line) = make_batch_and_line("ELEGANT-LAMP", 20, 2);
        assert!(large_batch.can_allocate(&small_line));
    }

    #[test]
    fn test_cannot_allocate_if_available_smaller_than_required() {
        let (small_batch, large_line) = make_batch_and_line("ELEGANT-LAMP", 2, 20);
        assert!(!small_batch.can_allocate(&large_line));
    }

    #[test]
    fn test_can_allocate_if_available_equal_to_required() {
        let (batch, line) = make_batch_and_line("ELEGANT-LAMP", 2, 2);
        assert!(batch.can_allocate(&line));
    }

    #[test]
    fn test_cannot_allocate_if_skus_do_not_match() {
        let batch = Batch::new("batch-001", "UNCOMFORTABLE-CHAIR", 100, None);
        let different_sku_line = OrderLine::new("order-123", "EXPENSIVE-TOASTER", 10);
        assert!(!batch.can_allocate(&different_sku_line));
    }

    #[test]
    fn test_allocation_is_idempotent() {
        let (mut batch, line) = make_batch_and_line("ANGULAR-DESK", 20, 2);
        batch.allocate(line.clone());
        batch.allocate(line);
        assert_eq!(batch.available_quantity(), 18);
        assert_eq!(batch.allocations().len(), 1);
    }

    #[test]
    fn test_can_only_deallocate_allocated_lines() {
        let (mut batch, unallocated_line) = make_batch_and_line("DECORATIVE-TRINKET", 20, 2);
        assert!(!batch.deallocate(&unallocated_line));
        assert_eq!(batch.available_quantity(), 20);
    }

    #[test]
    fn test_deallocate_one_takes_earliest_allocation() {
        let mut batch = Batch::new("batch-001", "RUG", 10, None);
        batch.allocate(OrderLine::new("o1", "RUG", 3));
        batch.allocate(OrderLine::new("o2", "RUG", 4));

        let removed = batch.deallocate_one().unwrap();
        assert_eq!(removed.orderid, OrderId::new("o1"));
        assert_eq!(batch.allocations(), &[OrderLine::new("o2", "RUG", 4)]);
        assert_eq!(batch.available_quantity(), 6);
    }

    #[test]
    fn test_available_quantity_goes_negative_after_reduction() {
        let (mut batch, line) = make_batch_and_line("RUG", 10, 8);
        batch.allocate(line);
        batch.set_purchased_quantity(5);
        assert_eq!(batch.available_quantity(), -3);
    }

    #[test]
    fn test_batches_are_equal_by_reference() {
        let a = Batch::new("batch-001", "RUG", 10, None);
        let b = Batch::new("batch-001", "RUG", 99, NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_restore_keeps_allocation_order() {
        let lines = vec![OrderLine::new("o2", "RUG", 1), OrderLine::new("o1", "RUG", 2)];
        let batch = Batch::restore("b".into(), "RUG".into(), 10, None, lines.clone());
        assert_eq!(batch.allocations(), lines.as_slice());
        assert_eq!(batch.available_quantity(), 7);
    }
}
