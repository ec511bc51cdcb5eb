//! Message bus routing events to handlers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use common::BatchReference;
use domain::{Event, EventKind};
use store::UnitOfWorkFactory;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::handlers::Handler;
use crate::unit_of_work::{EventSink, UnitOfWorkScope};

/// Default upper bound on events processed by one bus run.
pub const DEFAULT_MAX_EVENTS_PER_RUN: usize = 10_000;

/// What the bus does after a handler fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and keep processing the queue.
    #[default]
    Continue,
    /// Record the failure and stop the run.
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(format!("unknown handler failure policy '{other}'")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("continue"),
            FailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

/// Runtime knobs of a [`MessageBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub failure_policy: FailurePolicy,
    pub max_events_per_run: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            max_events_per_run: DEFAULT_MAX_EVENTS_PER_RUN,
        }
    }
}

/// Immutable table of handlers per event kind.
///
/// Handlers for one kind run in registration order.
#[derive(Default)]
pub struct Router {
    routes: HashMap<EventKind, Vec<Arc<dyn Handler>>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Handlers registered for the kind, in registration order.
    pub fn handlers_for(&self, kind: EventKind) -> &[Arc<dyn Handler>] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Names of the handlers registered for each kind.
    pub fn describe(&self) -> Vec<(EventKind, Vec<&'static str>)> {
        EventKind::ALL
            .iter()
            .map(|&kind| {
                let names = self.handlers_for(kind).iter().map(|h| h.name()).collect();
                (kind, names)
            })
            .collect()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.describe()).finish()
    }
}

/// Builder for [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<EventKind, Vec<Arc<dyn Handler>>>,
}

impl RouterBuilder {
    /// Registers a handler for one kind.
    pub fn route(self, kind: EventKind, handler: impl Handler + 'static) -> Self {
        self.route_shared(kind, Arc::new(handler))
    }

    /// Registers an already shared handler for one kind.
    pub fn route_shared(mut self, kind: EventKind, handler: Arc<dyn Handler>) -> Self {
        self.routes.entry(kind).or_default().push(handler);
        self
    }

    pub fn build(self) -> Router {
        Router {
            routes: self.routes,
        }
    }
}

/// What handlers get to work with during one bus run.
#[derive(Clone)]
pub struct HandlerContext {
    factory: Arc<dyn UnitOfWorkFactory>,
    sink: EventSink,
}

impl HandlerContext {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>, sink: EventSink) -> Self {
        Self { factory, sink }
    }

    /// Opens a unit of work whose events flow back into this run.
    pub async fn start(&self) -> Result<UnitOfWorkScope> {
        let uow = self.factory.begin().await?;
        Ok(UnitOfWorkScope::new(uow, self.sink.clone()))
    }

    /// Events drained by scopes and not yet picked up by the bus.
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }
}

/// A handler error recorded during a bus run.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: &'static str,
    pub kind: EventKind,
    pub error: ServiceError,
    /// True if the failing handler was handling the seed event.
    pub seed: bool,
}

/// Outcome of one [`MessageBus::handle`] run.
#[derive(Debug, Default)]
pub struct BusReport {
    /// Kinds of every processed event, in processing order.
    pub processed: Vec<EventKind>,
    /// Values returned by the seed event's successful handlers.
    pub results: Vec<Option<BatchReference>>,
    pub failures: Vec<HandlerFailure>,
    /// True if the run stopped early under [`FailurePolicy::Abort`].
    pub aborted: bool,
}

impl BusReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Type names of the processed events.
    pub fn processed_names(&self) -> Vec<&'static str> {
        self.processed.iter().map(EventKind::as_str).collect()
    }
}

/// Routes events to handlers until no events are left.
///
/// Each `handle` call owns its queue: the seed event goes in first, and
/// events drained from scopes opened by a handler are appended after that
/// handler returns, so processing is breadth-first.
#[derive(Clone)]
pub struct MessageBus {
    factory: Arc<dyn UnitOfWorkFactory>,
    router: Arc<Router>,
    config: BusConfig,
}

impl MessageBus {
    pub fn new(factory: Arc<dyn UnitOfWorkFactory>, router: Arc<Router>) -> Self {
        Self {
            factory,
            router,
            config: BusConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> BusConfig {
        self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Unit of work factory handlers open scopes from.
    pub fn factory(&self) -> &Arc<dyn UnitOfWorkFactory> {
        &self.factory
    }

    /// Processes the event and everything it causes.
    ///
    /// Handler failures are recorded in the report rather than returned;
    /// only exceeding `max_events_per_run` fails the call.
    pub async fn handle(&self, event: Event) -> Result<BusReport> {
        self.handle_all([event]).await
    }

    /// Processes several seed events in order, then everything they cause.
    ///
    /// Every seed is queued before any cascaded event, so results and seed
    /// failures cover all of them.
    #[tracing::instrument(skip(self, seeds), fields(run_id = %Uuid::new_v4()))]
    pub async fn handle_all(
        &self,
        seeds: impl IntoIterator<Item = Event> + Send,
    ) -> Result<BusReport> {
        let started = Instant::now();
        let ctx = HandlerContext::new(Arc::clone(&self.factory), EventSink::new());
        let mut queue: VecDeque<(Event, bool)> =
            seeds.into_iter().map(|event| (event, true)).collect();
        let mut report = BusReport::default();

        while let Some((event, seed)) = queue.pop_front() {
            if report.processed.len() >= self.config.max_events_per_run {
                tracing::error!(
                    limit = self.config.max_events_per_run,
                    pending = queue.len() + 1,
                    "event cascade limit exceeded"
                );
                return Err(ServiceError::CascadeLimitExceeded {
                    limit: self.config.max_events_per_run,
                });
            }

            let kind = event.kind();
            report.processed.push(kind);
            metrics::counter!("bus_events_processed_total", "event_type" => kind.as_str())
                .increment(1);

            let handlers = self.router.handlers_for(kind);
            if handlers.is_empty() {
                tracing::debug!(event_type = %kind, "no handlers registered");
            }

            for handler in handlers {
                let outcome = handler.handle(&event, &ctx).await;
                queue.extend(ctx.sink().take().into_iter().map(|caused| (caused, false)));

                match outcome {
                    Ok(value) => {
                        if seed {
                            report.results.push(value);
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            handler = handler.name(),
                            event_type = %kind,
                            %error,
                            "handler failed"
                        );
                        metrics::counter!(
                            "bus_handler_failures_total",
                            "handler" => handler.name()
                        )
                        .increment(1);
                        report.failures.push(HandlerFailure {
                            handler: handler.name(),
                            kind,
                            error,
                            seed,
                        });

                        if self.config.failure_policy == FailurePolicy::Abort {
                            report.aborted = true;
                            metrics::histogram!("bus_run_duration_seconds")
                                .record(started.elapsed().as_secs_f64());
                            return Ok(report);
                        }
                    }
                }
            }
        }

        metrics::histogram!("bus_run_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::debug!(
            processed = report.processed.len(),
            failures = report.failures.len(),
            "message bus run finished"
        );
        Ok(report)
    }

    /// Handles the event and reports the seed's outcome to the caller.
    ///
    /// Returns the first error raised by a handler of the seed event, or
    /// else the first value one of them produced. Failures further down the
    /// cascade are only logged.
    pub async fn dispatch(&self, event: Event) -> Result<Option<BatchReference>> {
        let report = self.handle(event).await?;

        if let Some(failure) = report.failures.into_iter().find(|f| f.seed) {
            return Err(failure.error);
        }
        Ok(report.results.into_iter().flatten().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use store::InMemoryStore;

    struct Echo(&'static str);

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn handle(
            &self,
            _event: &Event,
            _ctx: &HandlerContext,
        ) -> Result<Option<BatchReference>> {
            Ok(Some(BatchReference::new(self.0)))
        }
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("continue".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert_eq!(" ABORT ".parse::<FailurePolicy>(), Ok(FailurePolicy::Abort));
        assert!("explode".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::default(), FailurePolicy::Continue);
    }

    #[test]
    fn test_router_keeps_registration_order() {
        let router = Router::builder()
            .route(EventKind::OutOfStock, Echo("first"))
            .route(EventKind::OutOfStock, Echo("second"))
            .build();

        let names: Vec<_> = router
            .handlers_for(EventKind::OutOfStock)
            .iter()
            .map(|h| h.name())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(router.handlers_for(EventKind::Allocated).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_returns_first_seed_value() {
        let router = Router::builder()
            .route(EventKind::OutOfStock, Echo("first"))
            .route(EventKind::OutOfStock, Echo("second"))
            .build();
        let bus = MessageBus::new(Arc::new(InMemoryStore::new()), Arc::new(router));

        let value = bus.dispatch(Event::out_of_stock("LAMP".into())).await.unwrap();
        assert_eq!(value, Some(BatchReference::new("first")));
    }

    #[tokio::test]
    async fn test_event_without_handlers_is_processed() {
        let bus = MessageBus::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(Router::builder().build()),
        );

        let report = bus.handle(Event::out_of_stock("LAMP".into())).await.unwrap();
        assert_eq!(report.processed_names(), vec!["OutOfStock"]);
        assert!(report.is_success());
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_handle_all_treats_every_seed_as_seed() {
        let router = Router::builder()
            .route(EventKind::OutOfStock, Echo("notify"))
            .build();
        let bus = MessageBus::new(Arc::new(InMemoryStore::new()), Arc::new(router));

        let report = bus
            .handle_all([
                Event::out_of_stock("LAMP".into()),
                Event::out_of_stock("RUG".into()),
            ])
            .await
            .unwrap();

        assert_eq!(report.processed_names(), vec!["OutOfStock", "OutOfStock"]);
        assert_eq!(
            report.results,
            vec![
                Some(BatchReference::new("notify")),
                Some(BatchReference::new("notify"))
            ]
        );
    }
}
