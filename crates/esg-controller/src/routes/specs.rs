//! Spec routes: `/v1/specs/*`
//!
//! Applying a spec stores it and queues a reconcile pass for it. Deleting a
//! spec garbage-collects the secrets it controls.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use esg_core::spec::{ObjectMeta, ObjectRef, SecretSynthesis, SecretSynthesisSpec};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/specs` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_specs)).route(
        "/{namespace}/{name}",
        get(get_spec).put(apply_spec).delete(delete_spec),
    )
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `PUT /v1/specs/{namespace}/{name}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplySpecRequest {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: SecretSynthesisSpec,
}

#[derive(Debug, Serialize)]
pub struct SpecListResponse {
    pub specs: Vec<ObjectRef>,
}

#[derive(Debug, Serialize)]
pub struct DeleteSpecResponse {
    /// Secrets removed along with the spec.
    pub collected: Vec<ObjectRef>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Create or replace a spec and queue it for reconciliation.
async fn apply_spec(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<SecretSynthesis>, AppError> {
    // Decoded by hand so that spec decode errors come back as JSON.
    let request: ApplySpecRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid spec: {e}")))?;

    let spec = SecretSynthesis {
        metadata: ObjectMeta {
            name,
            namespace,
            uid: String::new(),
            labels: request.labels,
        },
        spec: request.spec,
    };
    let stored = state.store.apply_spec(spec).await?;
    let key = stored.object_ref();
    state.queue.add(&key);

    info!(spec = %key, secret = %stored.target_ref(), "spec accepted");
    Ok(Json(stored))
}

/// Read a stored spec.
async fn get_spec(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<SecretSynthesis>, AppError> {
    let spec = state
        .store
        .get_spec(&ObjectRef::new(&namespace, &name))
        .await?;
    Ok(Json(spec))
}

/// List every stored spec.
async fn list_specs(State(state): State<Arc<AppState>>) -> Result<Json<SpecListResponse>, AppError> {
    let specs = state.store.list_specs().await?;
    Ok(Json(SpecListResponse { specs }))
}

/// Delete a spec and the secrets it controls.
async fn delete_spec(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<DeleteSpecResponse>, AppError> {
    let collected = state
        .store
        .delete_spec(&ObjectRef::new(&namespace, &name))
        .await?;
    Ok(Json(DeleteSpecResponse { collected }))
}
