//! Wiring of the default message bus.

use std::sync::Arc;

use store::UnitOfWorkFactory;

use crate::handlers::{DEFAULT_OUT_OF_STOCK_RECIPIENT, default_routes};
use crate::messagebus::{BusConfig, FailurePolicy, MessageBus, Router};
use crate::notifications::{LoggingNotifier, Notifier};
use crate::publisher::{LoggingPublisher, Publisher};

/// Builds a [`MessageBus`] with every built-in handler registered.
///
/// Notifier and publisher default to the logging implementations.
pub struct Bootstrap {
    factory: Arc<dyn UnitOfWorkFactory>,
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn Publisher>,
    out_of_stock_recipient: String,
    config: BusConfig,
}

impl Bootstrap {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>) -> Self {
        Self {
            factory,
            notifier: Arc::new(LoggingNotifier),
            publisher: Arc::new(LoggingPublisher),
            out_of_stock_recipient: DEFAULT_OUT_OF_STOCK_RECIPIENT.to_string(),
            config: BusConfig::default(),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn out_of_stock_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.out_of_stock_recipient = recipient.into();
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn max_events_per_run(mut self, limit: usize) -> Self {
        self.config.max_events_per_run = limit;
        self
    }

    /// Builds the router alone, for callers that add their own handlers.
    pub fn router(&self) -> Router {
        default_routes(
            Arc::clone(&self.notifier),
            Arc::clone(&self.publisher),
            self.out_of_stock_recipient.clone(),
        )
        .into_iter()
        .fold(Router::builder(), |builder, (kind, handler)| {
            builder.route_shared(kind, handler)
        })
        .build()
    }

    pub fn build(self) -> MessageBus {
        let router = Arc::new(self.router());
        tracing::debug!(?router, policy = %self.config.failure_policy, "message bus wired");
        MessageBus::new(self.factory, router).with_config(self.config)
    }
}
