//! Service layer for the allocation service.
//!
//! Events enter through [`MessageBus::handle`] (or [`MessageBus::dispatch`]
//! for callers that need the allocation result). The bus routes each event
//! to the handlers registered for its kind; handlers open
//! [`UnitOfWorkScope`]s, and whatever events the touched products record are
//! fed back into the same run until the queue is empty.

pub mod bootstrap;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod messagebus;
pub mod notifications;
pub mod publisher;
pub mod unit_of_work;

pub use bootstrap::Bootstrap;
pub use consumer::{ConsumerStats, InboundMessage};
pub use error::{Result, ServiceError};
pub use handlers::Handler;
pub use messagebus::{
    BusConfig, BusReport, FailurePolicy, HandlerContext, HandlerFailure, MessageBus, Router,
    RouterBuilder,
};
pub use notifications::{InMemoryNotifier, LoggingNotifier, Notification, Notifier};
pub use publisher::{InMemoryPublisher, LoggingPublisher, PublishedMessage, Publisher};
pub use unit_of_work::{EventSink, ScopeState, UnitOfWorkScope};
