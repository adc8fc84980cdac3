//! Secrets generator controller.
//!
//! Wires the core library and a storage backend into a running process: an
//! Axum API through which specs are declared, a deduplicating work queue, and
//! a pool of reconcile workers that materialize each spec's secret once.

pub mod config;
pub mod error;
pub mod queue;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let sys_routes = Router::new()
        .nest("/v1/sys", routes::sys::router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(10));

    Router::new()
        .merge(sys_routes)
        .nest("/v1/specs", routes::specs::router())
        .nest("/v1/secrets", routes::secrets::router())
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
