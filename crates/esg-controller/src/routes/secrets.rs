//! Secret inspection routes: `/v1/secrets/*`
//!
//! Only metadata and key names are ever returned. Values stay in the store.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use esg_core::secret::{MaterializedSecret, OwnerReference};
use esg_core::spec::ObjectRef;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/secrets` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{namespace}/{name}", get(describe_secret))
}

/// Response body for `GET /v1/secrets/{namespace}/{name}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDescription {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub created_at: DateTime<Utc>,
    pub keys: Vec<String>,
}

impl From<MaterializedSecret> for SecretDescription {
    fn from(secret: MaterializedSecret) -> Self {
        let keys = secret.keys().map(str::to_owned).collect();
        let meta = secret.metadata;
        Self {
            name: meta.name,
            namespace: meta.namespace,
            labels: meta.labels,
            owner_references: meta.owner_references,
            created_at: meta.created_at,
            keys,
        }
    }
}

async fn describe_secret(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<SecretDescription>, AppError> {
    let secret = state
        .store
        .get_secret(&ObjectRef::new(&namespace, &name))
        .await?;
    Ok(Json(secret.into()))
}
