//! Event handlers.
//!
//! Each handler reacts to one event kind. Handlers that change products do
//! so inside their own [`UnitOfWorkScope`](crate::UnitOfWorkScope); the
//! events those products record reach the bus when the scope is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use common::BatchReference;
use domain::{
    AllocationError, AllocationRequest, Batch, BatchCreated, BatchQuantityChanged,
    Deallocated, Event, EventKind, OrderLine, OutOfStock, Product,
};
use store::StoreError;

use crate::error::{Result, ServiceError};
use crate::messagebus::HandlerContext;
use crate::notifications::Notifier;
use crate::publisher::Publisher;

/// Topic `Allocated` events are published on.
pub const LINE_ALLOCATED_TOPIC: &str = "line_allocated";

/// Default destination of out-of-stock notifications.
pub const DEFAULT_OUT_OF_STOCK_RECIPIENT: &str = "stock@made.com";

/// Something the message bus can route events to.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable name used in logs, metrics and failure reports.
    fn name(&self) -> &'static str;

    /// Handles one event. A returned batch reference is surfaced to
    /// `MessageBus::dispatch` callers when the event was the seed.
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Option<BatchReference>>;
}

fn unexpected(handler: &'static str, event: &Event) -> ServiceError {
    ServiceError::UnexpectedEvent {
        handler,
        kind: event.kind(),
    }
}

/// Creates the product on first sight of a sku, then adds the batch.
pub struct AddBatch;

impl AddBatch {
    async fn add_batch(data: &BatchCreated, ctx: &HandlerContext) -> Result<()> {
        let batch = Batch::new(data.reference.clone(), data.sku.clone(), data.qty, data.eta);

        let mut scope = ctx.start().await?;
        let owner = scope
            .products()
            .get_by_batch_reference(&data.reference)
            .await?
            .map(|product| product.sku().clone());
        if owner.is_some_and(|owner| owner != data.sku) {
            return Err(StoreError::DuplicateBatch {
                reference: data.reference.clone(),
                sku: data.sku.clone(),
            }
            .into());
        }

        match scope.products().get(&data.sku).await? {
            Some(product) => product.add_batch(batch)?,
            None => {
                scope
                    .products()
                    .add(Product::new(data.sku.clone(), vec![batch]))
                    .await?
            }
        }
        scope.commit().await?;

        tracing::info!(reference = %data.reference, sku = %data.sku, qty = data.qty, "batch added");
        Ok(())
    }
}

#[async_trait]
impl Handler for AddBatch {
    fn name(&self) -> &'static str {
        "add_batch"
    }

    #[tracing::instrument(skip_all, fields(handler = "add_batch"))]
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::BatchCreated(data) = event else {
            return Err(unexpected(self.name(), event));
        };
        Self::add_batch(data, ctx).await?;
        Ok(None)
    }
}

/// Applies a purchased quantity correction to a batch.
pub struct ChangeBatchQuantity;

impl ChangeBatchQuantity {
    async fn change(data: &BatchQuantityChanged, ctx: &HandlerContext) -> Result<()> {
        let mut scope = ctx.start().await?;
        let product = scope
            .products()
            .get_by_batch_reference(&data.reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                what: format!("batch {}", data.reference),
            })?;
        product.change_batch_quantity(&data.reference, data.qty)?;
        scope.commit().await?;

        tracing::info!(reference = %data.reference, qty = data.qty, "batch quantity changed");
        Ok(())
    }
}

#[async_trait]
impl Handler for ChangeBatchQuantity {
    fn name(&self) -> &'static str {
        "change_batch_quantity"
    }

    #[tracing::instrument(skip_all, fields(handler = "change_batch_quantity"))]
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::BatchQuantityChanged(data) = event else {
            return Err(unexpected(self.name(), event));
        };
        Self::change(data, ctx).await?;
        Ok(None)
    }
}

async fn allocate_line(line: OrderLine, ctx: &HandlerContext) -> Result<BatchReference> {
    let mut scope = ctx.start().await?;
    let product = scope
        .products()
        .get(&line.sku)
        .await?
        .ok_or_else(|| ServiceError::InvalidSku {
            sku: line.sku.clone(),
        })?;

    let orderid = line.orderid.clone();
    let batchref = product.allocate(line).map_err(|error| {
        if let AllocationError::OutOfStock { sku } = &error {
            metrics::counter!("out_of_stock_total").increment(1);
            tracing::info!(%sku, %orderid, "allocation failed: out of stock");
        }
        error
    })?;
    scope.commit().await?;

    metrics::counter!("allocations_total").increment(1);
    tracing::info!(%orderid, %batchref, "order line allocated");
    Ok(batchref)
}

/// Allocates a requested order line and returns the chosen batch.
pub struct Allocate;

#[async_trait]
impl Handler for Allocate {
    fn name(&self) -> &'static str {
        "allocate"
    }

    #[tracing::instrument(skip_all, fields(handler = "allocate"))]
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::AllocationRequest(AllocationRequest { orderid, sku, qty }) = event else {
            return Err(unexpected(self.name(), event));
        };
        let line = OrderLine::new(orderid.clone(), sku.clone(), *qty);
        allocate_line(line, ctx).await.map(Some)
    }
}

/// Finds a new batch for a line that was deallocated.
pub struct Reallocate;

#[async_trait]
impl Handler for Reallocate {
    fn name(&self) -> &'static str {
        "reallocate"
    }

    #[tracing::instrument(skip_all, fields(handler = "reallocate"))]
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::Deallocated(Deallocated { orderid, sku, qty }) = event else {
            return Err(unexpected(self.name(), event));
        };
        let request = Event::allocation_request(orderid.clone(), sku.clone(), *qty);
        Allocate.handle(&request, ctx).await
    }
}

/// Tells the stock team a sku ran out.
pub struct SendOutOfStockNotification {
    notifier: Arc<dyn Notifier>,
    recipient: String,
}

impl SendOutOfStockNotification {
    pub fn new(notifier: Arc<dyn Notifier>, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl Handler for SendOutOfStockNotification {
    fn name(&self) -> &'static str {
        "send_out_of_stock_notification"
    }

    async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::OutOfStock(OutOfStock { sku }) = event else {
            return Err(unexpected(self.name(), event));
        };
        self.notifier
            .send(&self.recipient, &format!("Out of stock for {sku}"))
            .await?;
        Ok(None)
    }
}

/// Publishes allocations to the `line_allocated` topic.
pub struct PublishAllocated {
    publisher: Arc<dyn Publisher>,
}

impl PublishAllocated {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Handler for PublishAllocated {
    fn name(&self) -> &'static str {
        "publish_allocated"
    }

    async fn handle(&self, event: &Event, _ctx: &HandlerContext) -> Result<Option<BatchReference>> {
        let Event::Allocated(data) = event else {
            return Err(unexpected(self.name(), event));
        };
        let payload = serde_json::to_value(data)?;
        self.publisher.publish(LINE_ALLOCATED_TOPIC, payload).await?;
        Ok(None)
    }
}

/// Kinds each built-in handler is registered for.
pub(crate) fn default_routes(
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn Publisher>,
    recipient: String,
) -> Vec<(EventKind, Arc<dyn Handler>)> {
    vec![
        (EventKind::BatchCreated, Arc::new(AddBatch)),
        (EventKind::BatchQuantityChanged, Arc::new(ChangeBatchQuantity)),
        (EventKind::AllocationRequest, Arc::new(Allocate)),
        (EventKind::Allocated, Arc::new(PublishAllocated::new(publisher))),
        (EventKind::Deallocated, Arc::new(Reallocate)),
        (
            EventKind::OutOfStock,
            Arc::new(SendOutOfStockNotification::new(notifier, recipient)),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messagebus::HandlerContext;
    use crate::notifications::InMemoryNotifier;
    use crate::publisher::InMemoryPublisher;
    use crate::unit_of_work::EventSink;
    use store::{InMemoryStore, UnitOfWorkFactory};

    fn context(store: &InMemoryStore) -> HandlerContext {
        HandlerContext::new(Arc::new(store.clone()), EventSink::new())
    }

    #[tokio::test]
    async fn test_add_batch_creates_product_then_appends() {
        let store = InMemoryStore::new();
        let ctx = context(&store);

        AddBatch
            .handle(&Event::batch_created("b1", "LAMP", 10, None), &ctx)
            .await
            .unwrap();
        AddBatch
            .handle(&Event::batch_created("b2", "LAMP", 5, None), &ctx)
            .await
            .unwrap();
        AddBatch
            .handle(&Event::batch_created("b2", "LAMP", 5, None), &ctx)
            .await
            .unwrap();

        let lamp = store.product(&"LAMP".into()).await.unwrap();
        assert_eq!(lamp.batches().len(), 2);
        assert_eq!(lamp.available_quantity(), 15);
        assert!(ctx.sink().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_unknown_sku_is_invalid_and_silent() {
        let store = InMemoryStore::new();
        let ctx = context(&store);

        let err = Allocate
            .handle(&Event::allocation_request("o1", "NOPE", 1), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidSku { ref sku } if sku.as_str() == "NOPE"));
        assert!(ctx.sink().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_out_of_stock_still_drains_event() {
        let store = InMemoryStore::new();
        let ctx = context(&store);
        AddBatch
            .handle(&Event::batch_created("b1", "LAMP", 1, None), &ctx)
            .await
            .unwrap();

        let err = Allocate
            .handle(&Event::allocation_request("o1", "LAMP", 2), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::OutOfStock { .. }));
        assert_eq!(ctx.sink().take(), vec![Event::out_of_stock("LAMP".into())]);
    }

    #[tokio::test]
    async fn test_change_quantity_of_unknown_batch_is_not_found() {
        let store = InMemoryStore::new();
        let ctx = context(&store);

        let err = ChangeBatchQuantity
            .handle(&Event::batch_quantity_changed("nope", 1), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reallocate_issues_a_fresh_allocation() {
        let store = InMemoryStore::new();
        let ctx = context(&store);
        AddBatch
            .handle(&Event::batch_created("b1", "LAMP", 10, None), &ctx)
            .await
            .unwrap();

        let batchref = Reallocate
            .handle(&Event::deallocated("o1".into(), "LAMP".into(), 3), &ctx)
            .await
            .unwrap();

        assert_eq!(batchref, Some("b1".into()));
        let mut uow = store.begin().await.unwrap();
        let lamp = uow.products().get(&"LAMP".into()).await.unwrap().unwrap();
        assert_eq!(lamp.allocation_for(&"o1".into()), Some(&BatchReference::new("b1")));
    }

    #[tokio::test]
    async fn test_notification_goes_to_configured_recipient() {
        let store = InMemoryStore::new();
        let notifier = InMemoryNotifier::new();
        let handler =
            SendOutOfStockNotification::new(Arc::new(notifier.clone()), "ops@example.com");

        handler
            .handle(&Event::out_of_stock("LAMP".into()), &context(&store))
            .await
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "ops@example.com");
        assert_eq!(sent[0].message, "Out of stock for LAMP");
    }

    #[tokio::test]
    async fn test_publish_allocated_payload() {
        let store = InMemoryStore::new();
        let publisher = InMemoryPublisher::new();
        let handler = PublishAllocated::new(Arc::new(publisher.clone()));

        handler
            .handle(
                &Event::allocated("o1".into(), "LAMP".into(), "b1".into(), 3),
                &context(&store),
            )
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, LINE_ALLOCATED_TOPIC);
        assert_eq!(
            published[0].payload,
            serde_json::json!({"orderid": "o1", "sku": "LAMP", "batchref": "b1", "qty": 3})
        );
    }

    #[tokio::test]
    async fn test_wrong_event_kind_is_rejected() {
        let store = InMemoryStore::new();
        let err = Allocate
            .handle(&Event::out_of_stock("LAMP".into()), &context(&store))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::UnexpectedEvent {
                handler: "allocate",
                kind: EventKind::OutOfStock
            }
        ));
    }
}
