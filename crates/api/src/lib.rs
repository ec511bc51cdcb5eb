//! HTTP adapter for the allocation service.
//!
//! Request bodies become events dispatched on the message bus; service
//! errors map onto HTTP statuses. Structured logging comes from tracing and
//! metrics are exposed in Prometheus format.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use service::{Bootstrap, MessageBus};
use store::UnitOfWorkFactory;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub bus: Arc<MessageBus>,
    /// Name of the product store backend, reported by `/health`.
    pub store_backend: &'static str,
    pub metrics: Option<PrometheusHandle>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/metrics", get(routes::metrics::render))
        .route("/batches", post(routes::allocation::add_batch))
        .route("/batches/quantity", post(routes::allocation::change_quantity))
        .route("/allocate", post(routes::allocation::allocate))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with the default handlers wired to `factory`.
pub fn create_state(
    factory: Arc<dyn UnitOfWorkFactory>,
    store_backend: &'static str,
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> Arc<AppState> {
    let bus = Bootstrap::new(factory)
        .out_of_stock_recipient(config.out_of_stock_recipient.clone())
        .failure_policy(config.failure_policy)
        .build();

    Arc::new(AppState {
        bus: Arc::new(bus),
        store_backend,
        metrics,
    })
}
