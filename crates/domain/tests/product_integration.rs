//! Integration tests for the Product aggregate through its public API.

use chrono::NaiveDate;
use domain::{
    Aggregate, AllocationError, Batch, BatchReference, DomainEvent, Event, EventKind, OrderLine,
    Product, Version,
};

fn eta(day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2026, 12, day)
}

mod allocation_order {
    use super::*;

    #[test]
    fn warehouse_stock_then_earliest_shipment() {
        let mut product = Product::new(
            "DESK",
            vec![
                Batch::new("late", "DESK", 10, eta(20)),
                Batch::new("early", "DESK", 10, eta(5)),
                Batch::new("warehouse", "DESK", 10, None),
            ],
        );

        let picks: Vec<BatchReference> = (1..=3)
            .map(|i| {
                product
                    .allocate(OrderLine::new(format!("o{i}"), "DESK", 10))
                    .unwrap()
            })
            .collect();

        assert_eq!(
            picks,
            vec![
                BatchReference::new("warehouse"),
                BatchReference::new("early"),
                BatchReference::new("late"),
            ]
        );
        assert_eq!(product.version_number(), Version::new(3));
        assert_eq!(product.available_quantity(), 0);
    }

    #[test]
    fn exhausted_stock_records_out_of_stock_only() {
        let mut product = Product::new("DESK", vec![Batch::new("b1", "DESK", 3, None)]);

        let err = product
            .allocate(OrderLine::new("o1", "DESK", 4))
            .unwrap_err();

        assert_eq!(err, AllocationError::OutOfStock { sku: "DESK".into() });
        let kinds: Vec<EventKind> = product.take_events().iter().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::OutOfStock]);
        assert_eq!(product.version(), Version::initial());
    }
}

mod quantity_changes {
    use super::*;

    #[test]
    fn deallocated_lines_carry_their_fields() {
        let mut product = Product::new("LAMP", vec![Batch::new("b1", "LAMP", 10, None)]);
        product.allocate(OrderLine::new("o1", "LAMP", 10)).unwrap();
        product.take_events();

        product.change_batch_quantity(&"b1".into(), 5).unwrap();

        let events = product.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "Deallocated");
        assert_eq!(events[0], Event::deallocated("o1".into(), "LAMP".into(), 10));
        assert!(product.batches()[0].available_quantity() >= 0);
    }

    #[test]
    fn version_is_untouched_by_quantity_changes() {
        let mut product = Product::new("LAMP", vec![Batch::new("b1", "LAMP", 10, None)]);
        product.allocate(OrderLine::new("o1", "LAMP", 6)).unwrap();

        product.change_batch_quantity(&"b1".into(), 2).unwrap();

        assert_eq!(product.version_number(), Version::new(1));
    }
}
