//! Storage-backed resource store for specs and materialized secrets.
//!
//! Objects are stored as JSON on top of any [`StorageBackend`]:
//!
//! - specs at `specs/<namespace>/<name>`
//! - materialized secrets at `secrets/<namespace>/<name>`
//!
//! Secrets are write-once through [`ResourceStore::create_secret`], which uses
//! the backend's atomic create-if-absent. Deleting a spec garbage-collects
//! every secret whose controlling owner reference carries the spec's uid.
//! [`ResourceStore::collect_orphans`] catches secrets created after that
//! collection ran.

use std::collections::HashSet;
use std::sync::Arc;

use esg_storage::StorageBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::{SecretStore, SpecSource};
use crate::error::StoreError;
use crate::secret::MaterializedSecret;
use crate::spec::{KIND, ObjectRef, SecretSynthesis};

const SPEC_PREFIX: &str = "specs/";
const SECRET_PREFIX: &str = "secrets/";

const SPEC_KIND: &str = "spec";
const SECRET_KIND: &str = "secret";

/// JSON object store for specs and materialized secrets.
#[derive(Clone)]
pub struct ResourceStore {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore").finish_non_exhaustive()
    }
}

fn spec_key(key: &ObjectRef) -> String {
    format!("{SPEC_PREFIX}{}/{}", key.namespace, key.name)
}

fn secret_key(key: &ObjectRef) -> String {
    format!("{SECRET_PREFIX}{}/{}", key.namespace, key.name)
}

/// Parse `<prefix><namespace>/<name>` back into an object reference.
fn parse_key(prefix: &str, key: &str) -> Option<ObjectRef> {
    let (namespace, name) = key.strip_prefix(prefix)?.split_once('/')?;
    Some(ObjectRef::new(namespace, name))
}

fn encode<T: Serialize>(kind: &'static str, object: &ObjectRef, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Codec {
        kind,
        object: object.to_string(),
        reason: format!("serialization failed: {e}"),
    })
}

fn decode<T: DeserializeOwned>(kind: &'static str, object: &ObjectRef, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Codec {
        kind,
        object: object.to_string(),
        reason: format!("deserialization failed: {e}"),
    })
}

impl ResourceStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // ── Specs ────────────────────────────────────────────────────────

    /// Create or replace a spec.
    ///
    /// A new spec gets a fresh uid; replacing an existing one keeps its uid so
    /// that secrets it already owns stay owned. Any uid on the input is
    /// ignored. Returns the spec as stored.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidSpec`] if the spec fails validation.
    /// - [`StoreError::Codec`] if an existing record cannot be read back.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn apply_spec(&self, mut spec: SecretSynthesis) -> Result<SecretSynthesis, StoreError> {
        spec.validate()?;
        let object = spec.object_ref();
        let key = spec_key(&object);

        // First applies race through the backend's create so that exactly one
        // uid wins; the losers retry as replacements and adopt it.
        loop {
            match self.get_spec(&object).await {
                Ok(existing) => {
                    spec.metadata.uid = existing.metadata.uid;
                    let bytes = encode(SPEC_KIND, &object, &spec)?;
                    self.backend.put(&key, &bytes).await?;
                    break;
                }
                Err(e) if e.is_not_found() => {
                    spec.metadata.uid = uuid::Uuid::new_v4().to_string();
                    let bytes = encode(SPEC_KIND, &object, &spec)?;
                    if self.backend.create(&key, &bytes).await? {
                        break;
                    }
                    debug!(spec = %object, "spec created concurrently, applying as replacement");
                }
                Err(e) => return Err(e),
            }
        }

        info!(spec = %object, uid = %spec.metadata.uid, "spec applied");
        Ok(spec)
    }

    /// Read a spec.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if it does not exist.
    /// - [`StoreError::Codec`] if the stored record is unreadable.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn get_spec(&self, key: &ObjectRef) -> Result<SecretSynthesis, StoreError> {
        let bytes = self
            .backend
            .get(&spec_key(key))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: SPEC_KIND,
                object: key.to_string(),
            })?;
        decode(SPEC_KIND, key, &bytes)
    }

    /// References of every stored spec, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if storage fails.
    pub async fn list_specs(&self) -> Result<Vec<ObjectRef>, StoreError> {
        let keys = self.backend.list(SPEC_PREFIX).await?;
        Ok(keys.iter().filter_map(|k| parse_key(SPEC_PREFIX, k)).collect())
    }

    /// Delete a spec and garbage-collect the secrets it controls.
    ///
    /// Returns the references of the deleted secrets. Secrets that exist at
    /// the spec's target but are owned by something else are left alone.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the spec does not exist.
    /// - [`StoreError::Codec`] if a stored record is unreadable.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn delete_spec(&self, key: &ObjectRef) -> Result<Vec<ObjectRef>, StoreError> {
        let spec = self.get_spec(key).await?;
        self.backend.delete(&spec_key(key)).await?;

        let mut collected = Vec::new();
        for secret_ref in self.list_secrets().await? {
            let secret = match self.get_secret(&secret_ref).await {
                Ok(secret) => secret,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let owned = secret
                .controller_owner()
                .is_some_and(|o| o.uid == spec.metadata.uid);
            if owned {
                self.backend.delete(&secret_key(&secret_ref)).await?;
                debug!(spec = %key, secret = %secret_ref, "owned secret collected");
                collected.push(secret_ref);
            }
        }

        info!(spec = %key, collected = collected.len(), "spec deleted");
        Ok(collected)
    }

    /// Delete every secret whose controlling owner is a spec that no longer
    /// exists.
    ///
    /// Secrets without a controlling owner, or owned by another kind, are
    /// left alone. Returns the references of the deleted secrets.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Codec`] if a stored record is unreadable.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn collect_orphans(&self) -> Result<Vec<ObjectRef>, StoreError> {
        // Secrets are read before specs: an owner is always stored before
        // anything it owns, so a live owner cannot be missed.
        let mut candidates = Vec::new();
        for secret_ref in self.list_secrets().await? {
            match self.get_secret(&secret_ref).await {
                Ok(secret) => {
                    if let Some(owner) = secret.controller_owner().filter(|o| o.kind == KIND) {
                        candidates.push((secret_ref, owner.uid.clone()));
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut live = HashSet::new();
        for spec_ref in self.list_specs().await? {
            match self.get_spec(&spec_ref).await {
                Ok(spec) => {
                    live.insert(spec.metadata.uid);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let mut collected = Vec::new();
        for (secret_ref, uid) in candidates {
            if live.contains(&uid) {
                continue;
            }
            if self.delete_owned_secret(&secret_ref, &uid).await? {
                debug!(secret = %secret_ref, owner = %uid, "orphaned secret collected");
                collected.push(secret_ref);
            }
        }

        if !collected.is_empty() {
            info!(collected = collected.len(), "orphaned secrets collected");
        }
        Ok(collected)
    }

    // ── Secrets ──────────────────────────────────────────────────────

    /// Read a materialized secret.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if it does not exist.
    /// - [`StoreError::Codec`] if the stored record is unreadable.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn get_secret(&self, key: &ObjectRef) -> Result<MaterializedSecret, StoreError> {
        let bytes = self
            .backend
            .get(&secret_key(key))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: SECRET_KIND,
                object: key.to_string(),
            })?;
        decode(SECRET_KIND, key, &bytes)
    }

    /// Persist a secret if nothing exists at its identity.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if a secret is already stored there.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn create_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError> {
        let object = secret.object_ref();
        let bytes = encode(SECRET_KIND, &object, secret)?;
        if self.backend.create(&secret_key(&object), &bytes).await? {
            Ok(())
        } else {
            Err(StoreError::AlreadyExists {
                kind: SECRET_KIND,
                object: object.to_string(),
            })
        }
    }

    /// Delete the secret at `target` if its controlling owner carries
    /// `owner_uid`.
    ///
    /// Returns whether a secret was deleted. An absent secret, or one owned
    /// by anything else, is left as is.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Codec`] if the stored record is unreadable.
    /// - [`StoreError::Backend`] if storage fails.
    pub async fn delete_owned_secret(&self, target: &ObjectRef, owner_uid: &str) -> Result<bool, StoreError> {
        let secret = match self.get_secret(target).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if !secret.controller_owner().is_some_and(|o| o.uid == owner_uid) {
            return Ok(false);
        }
        self.backend.delete(&secret_key(target)).await?;
        Ok(true)
    }

    /// References of every stored secret, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if storage fails.
    pub async fn list_secrets(&self) -> Result<Vec<ObjectRef>, StoreError> {
        let keys = self.backend.list(SECRET_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|k| parse_key(SECRET_PREFIX, k))
            .collect())
    }
}

#[async_trait::async_trait]
impl SpecSource for ResourceStore {
    async fn fetch_spec(&self, key: &ObjectRef) -> Result<Option<SecretSynthesis>, StoreError> {
        match self.get_spec(key).await {
            Ok(spec) => Ok(Some(spec)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for ResourceStore {
    async fn probe_secret(&self, target: &ObjectRef) -> Result<MaterializedSecret, StoreError> {
        self.get_secret(target).await
    }

    async fn create_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError> {
        Self::create_secret(self, secret).await
    }

    async fn withdraw_secret(&self, target: &ObjectRef, owner_uid: &str) -> Result<bool, StoreError> {
        self.delete_owned_secret(target, owner_uid).await
    }

    async fn collect_orphans(&self) -> Result<Vec<ObjectRef>, StoreError> {
        Self::collect_orphans(self).await
    }
}
