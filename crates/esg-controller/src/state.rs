//! Shared application state.
//!
//! A single [`AppState`] is built at startup and shared across all Axum
//! handlers via `Arc`.

use esg_core::store::ResourceStore;

use crate::queue::WorkQueue;

/// Shared application state passed to all HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Spec and secret persistence.
    pub store: ResourceStore,
    /// Queue feeding the reconcile workers.
    pub queue: WorkQueue,
}
