//! Convergence controller.
//!
//! One [`Controller::reconcile`] call is one pass for one spec:
//!
//! 1. fetch the spec; if it is gone, sweep orphaned secrets and stop
//! 2. probe the target secret; if present, schedule a re-probe and stop
//! 3. evaluate generators and render templates
//! 4. create the secret with an owner reference back to the spec
//! 5. fetch the spec again; if it was deleted or replaced in the meantime,
//!    withdraw the secret just created
//!
//! Generation never runs while a secret with the target identity exists, no
//! matter how the spec's generators have changed since. An "already exists"
//! answer from the create call counts as converged.
//!
//! The controller talks to the outside world only through [`SpecSource`],
//! [`SecretStore`] and [`Scheduler`]. It never retries in a loop; every retry
//! goes through the scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{GeneratorError, ReconcileError, StoreError};
use crate::generator;
use crate::secret::{MaterializedSecret, SecretMeta, SecretValue};
use crate::spec::{ObjectRef, SecretSynthesis, SecretSynthesisSpec};
use crate::template;

/// Default interval between re-probes of a synced spec.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default interval before the next pass after a create attempt.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Read access to declared specs.
#[async_trait::async_trait]
pub trait SpecSource: Send + Sync {
    /// Fetch a spec by identity. `Ok(None)` means it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lookup itself fails.
    async fn fetch_spec(&self, key: &ObjectRef) -> Result<Option<SecretSynthesis>, StoreError>;
}

/// Probe and create access to materialized secrets.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if it does not exist, or any other
    /// [`StoreError`] if the probe fails.
    async fn probe_secret(&self, target: &ObjectRef) -> Result<MaterializedSecret, StoreError>;

    /// Create the secret if nothing exists at its identity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if something does, or any other
    /// [`StoreError`] if the write fails.
    async fn create_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError>;

    /// Delete the secret at `target` if its controlling owner has
    /// `owner_uid`. Returns whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read or delete fails.
    async fn withdraw_secret(&self, target: &ObjectRef, owner_uid: &str) -> Result<bool, StoreError>;

    /// Delete every secret whose controlling spec no longer exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if listing or deleting fails.
    async fn collect_orphans(&self) -> Result<Vec<ObjectRef>, StoreError>;
}

/// Requests a future pass for a spec.
pub trait Scheduler: Send + Sync {
    /// Run another pass for `key` after `after` has elapsed.
    fn schedule_retry(&self, key: &ObjectRef, after: Duration);
}

/// Timing of scheduled passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Delay before re-probing a spec whose secret exists.
    pub resync_interval: Duration,
    /// Delay before the next pass after a create attempt, successful or not.
    pub retry_interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The spec no longer exists; nothing was done.
    SpecGone,
    /// The secret already exists; nothing was done.
    InSync,
    /// The secret was created with this many keys.
    Created { keys: usize },
    /// Another pass created the secret first.
    CreateRaced,
    /// The spec was deleted or replaced while the pass ran; the secret it
    /// created was removed again.
    Withdrawn,
    /// Shutdown was requested before anything was persisted.
    Cancelled,
}

/// Secret data synthesized from a spec, plus the generators that failed.
#[derive(Debug)]
pub struct Synthesis {
    pub data: BTreeMap<String, SecretValue>,
    pub failures: Vec<GeneratorError>,
}

/// Evaluate every generator and compose the secret payload.
///
/// Pure apart from entropy; CPU bound because of hashing.
///
/// # Errors
///
/// Returns [`ReconcileError::NoUsableOutputs`] if every declared generator
/// failed.
pub fn synthesize(spec: &SecretSynthesisSpec) -> Result<Synthesis, ReconcileError> {
    let evaluation = generator::evaluate_all(&spec.generators)?;
    let data = template::compose(&spec.generators, &evaluation.outputs, &spec.templates);
    Ok(Synthesis {
        data,
        failures: evaluation.failures,
    })
}

/// Runs reconciliation passes against injected collaborators.
pub struct Controller {
    specs: Arc<dyn SpecSource>,
    secrets: Arc<dyn SecretStore>,
    scheduler: Arc<dyn Scheduler>,
    config: ReconcileConfig,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[must_use]
    pub fn new(
        specs: Arc<dyn SpecSource>,
        secrets: Arc<dyn SecretStore>,
        scheduler: Arc<dyn Scheduler>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            specs,
            secrets,
            scheduler,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> ReconcileConfig {
        self.config
    }

    /// Run one pass for the spec at `key`.
    ///
    /// `shutdown` is checked before the probe and again right before the
    /// create call; a pass cancelled at either point has persisted nothing.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::SpecLoad`] if the spec cannot be fetched or is invalid.
    /// - [`ReconcileError::StoreProbeFailed`] if the probe fails with anything
    ///   but not-found. Nothing is scheduled; the caller applies its backoff.
    /// - [`ReconcileError::NoUsableOutputs`] / [`ReconcileError::Evaluation`]
    ///   if generation produced nothing.
    /// - [`ReconcileError::CreateFailed`] if the create fails with anything
    ///   but already-exists. A retry is scheduled before returning.
    /// - [`ReconcileError::WithdrawFailed`] if the spec vanished mid-pass and
    ///   the secret just created could not be removed.
    pub async fn reconcile(
        &self,
        key: &ObjectRef,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let span = info_span!("reconcile", spec = %key);
        self.run_pass(key, shutdown).instrument(span).await
    }

    async fn run_pass(
        &self,
        key: &ObjectRef,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        debug!("starting reconcile pass");

        let spec_load = |source: StoreError| ReconcileError::SpecLoad {
            spec: key.to_string(),
            source,
        };
        let Some(spec) = self.specs.fetch_spec(key).await.map_err(spec_load)? else {
            debug!("spec no longer exists, sweeping orphaned secrets");
            if let Err(e) = self.secrets.collect_orphans().await {
                warn!(error = %e, "orphan sweep failed");
            }
            return Ok(ReconcileOutcome::SpecGone);
        };
        spec.validate()
            .map_err(|e| spec_load(StoreError::InvalidSpec(e)))?;

        if *shutdown.borrow() {
            info!("shutdown requested, abandoning pass before probe");
            return Ok(ReconcileOutcome::Cancelled);
        }

        let target = spec.target_ref();
        match self.secrets.probe_secret(&target).await {
            Ok(existing) => {
                let owner_uid = existing.controller_owner().map(|o| o.uid.as_str());
                if owner_uid != Some(spec.metadata.uid.as_str()) {
                    warn!(
                        secret = %target,
                        owner = owner_uid.unwrap_or("<none>"),
                        "secret exists but is not controlled by this spec, leaving it alone"
                    );
                }
                debug!(secret = %target, "secret already materialized");
                self.scheduler
                    .schedule_retry(key, self.config.resync_interval);
                return Ok(ReconcileOutcome::InSync);
            }
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(ReconcileError::StoreProbeFailed {
                    target: target.to_string(),
                    source,
                });
            }
        }

        info!(
            secret = %target,
            generators = spec.spec.generators.len(),
            templates = spec.spec.templates.len(),
            "secret missing, generating"
        );
        let synthesis = {
            let spec_body = spec.spec.clone();
            tokio::task::spawn_blocking(move || synthesize(&spec_body))
                .await
                .map_err(|e| ReconcileError::Evaluation {
                    reason: e.to_string(),
                })??
        };
        if !synthesis.failures.is_empty() {
            warn!(
                failed = synthesis.failures.len(),
                "some generators failed, their placeholders stay unresolved"
            );
        }

        let secret = build_secret(&spec, &target, &synthesis.data);
        let keys = secret.data.len();

        if *shutdown.borrow() {
            info!("shutdown requested, abandoning pass before create");
            return Ok(ReconcileOutcome::Cancelled);
        }

        match self.secrets.create_secret(&secret).await {
            Ok(()) => {
                info!(secret = %target, keys, "materialized secret created");
                if self.withdraw_if_superseded(key, &spec, &target).await? {
                    return Ok(ReconcileOutcome::Withdrawn);
                }
                self.scheduler.schedule_retry(key, self.config.retry_interval);
                Ok(ReconcileOutcome::Created { keys })
            }
            Err(e) if e.is_already_exists() => {
                info!(secret = %target, "secret was created concurrently, treating as converged");
                self.scheduler
                    .schedule_retry(key, self.config.resync_interval);
                Ok(ReconcileOutcome::CreateRaced)
            }
            Err(source) => {
                error!(secret = %target, error = %source, "failed to create secret");
                self.scheduler.schedule_retry(key, self.config.retry_interval);
                Err(ReconcileError::CreateFailed {
                    target: target.to_string(),
                    source,
                })
            }
        }
    }

    /// Re-read the spec after a create. If it was deleted, or replaced under a
    /// new uid, the secret just created has no live owner and is removed.
    /// A replaced spec gets an immediate pass of its own.
    async fn withdraw_if_superseded(
        &self,
        key: &ObjectRef,
        spec: &SecretSynthesis,
        target: &ObjectRef,
    ) -> Result<bool, ReconcileError> {
        let current = self
            .specs
            .fetch_spec(key)
            .await
            .map_err(|source| ReconcileError::SpecLoad {
                spec: key.to_string(),
                source,
            })?;
        let replaced = match current {
            Some(current) if current.metadata.uid == spec.metadata.uid => return Ok(false),
            Some(_) => true,
            None => false,
        };

        self.secrets
            .withdraw_secret(target, &spec.metadata.uid)
            .await
            .map_err(|source| ReconcileError::WithdrawFailed {
                target: target.to_string(),
                source,
            })?;
        info!(secret = %target, replaced, "spec changed during the pass, created secret withdrawn");
        if replaced {
            self.scheduler.schedule_retry(key, Duration::ZERO);
        }
        Ok(true)
    }
}

fn build_secret(
    spec: &SecretSynthesis,
    target: &ObjectRef,
    data: &BTreeMap<String, SecretValue>,
) -> MaterializedSecret {
    MaterializedSecret {
        metadata: SecretMeta {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            labels: spec.spec.secret.labels.clone(),
            owner_references: vec![spec.owner_reference()],
            created_at: Utc::now(),
        },
        data: data
            .iter()
            .map(|(k, v)| (k.clone(), v.expose().as_bytes().to_vec()))
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::spec::{GeneratorSpec, KeyTemplate, ObjectMeta, SecretTarget};

    /// Scripted collaborator recording every call.
    #[derive(Default)]
    struct Fake {
        spec: Mutex<Option<SecretSynthesis>>,
        /// Replaces `spec` right after the first fetch.
        spec_after_fetch: Mutex<Option<Option<SecretSynthesis>>>,
        stop_on_probe: Mutex<Option<watch::Sender<bool>>>,
        existing: Mutex<Option<MaterializedSecret>>,
        probe_error: Mutex<Option<StoreError>>,
        create_error: Mutex<Option<StoreError>>,
        created: Mutex<Vec<MaterializedSecret>>,
        probes: AtomicUsize,
        withdrawn: Mutex<Vec<(ObjectRef, String)>>,
        sweeps: AtomicUsize,
        scheduled: Mutex<Vec<(ObjectRef, Duration)>>,
    }

    #[async_trait::async_trait]
    impl SpecSource for Fake {
        async fn fetch_spec(&self, _key: &ObjectRef) -> Result<Option<SecretSynthesis>, StoreError> {
            let mut spec = self.spec.lock().unwrap();
            let current = spec.clone();
            if let Some(next) = self.spec_after_fetch.lock().unwrap().take() {
                *spec = next;
            }
            Ok(current)
        }
    }

    #[async_trait::async_trait]
    impl SecretStore for Fake {
        async fn probe_secret(&self, target: &ObjectRef) -> Result<MaterializedSecret, StoreError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if let Some(stop) = self.stop_on_probe.lock().unwrap().take() {
                stop.send(true).unwrap();
            }
            if let Some(e) = self.probe_error.lock().unwrap().take() {
                return Err(e);
            }
            self.existing
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| StoreError::NotFound {
                    kind: "secret",
                    object: target.to_string(),
                })
        }

        async fn create_secret(&self, secret: &MaterializedSecret) -> Result<(), StoreError> {
            if let Some(e) = self.create_error.lock().unwrap().take() {
                return Err(e);
            }
            self.created.lock().unwrap().push(secret.clone());
            Ok(())
        }

        async fn withdraw_secret(&self, target: &ObjectRef, owner_uid: &str) -> Result<bool, StoreError> {
            self.withdrawn
                .lock()
                .unwrap()
                .push((target.clone(), owner_uid.to_owned()));
            Ok(true)
        }

        async fn collect_orphans(&self) -> Result<Vec<ObjectRef>, StoreError> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    impl Scheduler for Fake {
        fn schedule_retry(&self, key: &ObjectRef, after: Duration) {
            self.scheduled.lock().unwrap().push((key.clone(), after));
        }
    }

    fn sample_spec() -> SecretSynthesis {
        SecretSynthesis {
            metadata: ObjectMeta {
                name: "db-spec".to_owned(),
                namespace: "apps".to_owned(),
                uid: "uid-1".to_owned(),
                labels: BTreeMap::new(),
            },
            spec: SecretSynthesisSpec {
                secret: SecretTarget {
                    name: "db".to_owned(),
                    namespace: None,
                    labels: BTreeMap::from([("app".to_owned(), "db".to_owned())]),
                },
                generators: vec![GeneratorSpec::string("pw", 12)],
                templates: vec![KeyTemplate {
                    key: "PASSWORD".to_owned(),
                    template_string: "{{ pw }}".to_owned(),
                }],
            },
        }
    }

    fn controller(fake: &Arc<Fake>) -> Controller {
        Controller::new(
            Arc::clone(fake) as Arc<dyn SpecSource>,
            Arc::clone(fake) as Arc<dyn SecretStore>,
            Arc::clone(fake) as Arc<dyn Scheduler>,
            ReconcileConfig::default(),
        )
    }

    fn key() -> ObjectRef {
        ObjectRef::new("apps", "db-spec")
    }

    fn running() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn missing_spec_is_silently_skipped() {
        let fake = Arc::new(Fake::default());
        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::SpecGone);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
        assert_eq!(fake.sweeps.load(Ordering::SeqCst), 1);
        assert!(fake.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn creates_secret_with_owner_and_labels() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());

        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created { keys: 1 });

        let created = fake.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        let secret = &created[0];
        assert_eq!(secret.object_ref(), ObjectRef::new("apps", "db"));
        assert_eq!(secret.metadata.labels["app"], "db");
        let owner = secret.controller_owner().unwrap();
        assert_eq!((owner.kind.as_str(), owner.uid.as_str()), ("SecretSynthesis", "uid-1"));
        assert_eq!(secret.data["PASSWORD"].len(), 12);

        assert_eq!(
            *fake.scheduled.lock().unwrap(),
            vec![(key(), DEFAULT_RETRY_INTERVAL)]
        );
    }

    #[tokio::test]
    async fn existing_secret_is_never_regenerated() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        let ctrl = controller(&fake);
        ctrl.reconcile(&key(), &running()).await.unwrap();
        let first = fake.created.lock().unwrap()[0].clone();
        *fake.existing.lock().unwrap() = Some(first);

        // Changing generators afterwards must not matter.
        fake.spec.lock().unwrap().as_mut().unwrap().spec.generators[0].length = 40;
        for _ in 0..3 {
            let outcome = ctrl.reconcile(&key(), &running()).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::InSync);
        }
        assert_eq!(fake.created.lock().unwrap().len(), 1);
        let scheduled = fake.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 4);
        assert!(scheduled[1..].iter().all(|(_, d)| *d == DEFAULT_RESYNC_INTERVAL));
    }

    #[tokio::test]
    async fn foreign_secret_counts_as_synced() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        let mut foreign = build_secret(&sample_spec(), &ObjectRef::new("apps", "db"), &BTreeMap::new());
        foreign.metadata.owner_references.clear();
        *fake.existing.lock().unwrap() = Some(foreign);

        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert!(fake.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn probe_failure_is_surfaced_without_scheduling() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        *fake.probe_error.lock().unwrap() = Some(StoreError::Codec {
            kind: "secret",
            object: "apps/db".to_owned(),
            reason: "garbage".to_owned(),
        });

        let err = controller(&fake).reconcile(&key(), &running()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::StoreProbeFailed { .. }));
        assert!(fake.created.lock().unwrap().is_empty());
        assert!(fake.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_exists_on_create_is_success() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        *fake.create_error.lock().unwrap() = Some(StoreError::AlreadyExists {
            kind: "secret",
            object: "apps/db".to_owned(),
        });

        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::CreateRaced);
        assert_eq!(
            *fake.scheduled.lock().unwrap(),
            vec![(key(), DEFAULT_RESYNC_INTERVAL)]
        );
    }

    #[tokio::test]
    async fn create_failure_is_surfaced_and_retried() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        *fake.create_error.lock().unwrap() = Some(StoreError::Backend(
            esg_storage::StorageError::Write {
                key: "secrets/apps/db".to_owned(),
                reason: "disk full".to_owned(),
            },
        ));

        let err = controller(&fake).reconcile(&key(), &running()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::CreateFailed { .. }));
        assert_eq!(
            *fake.scheduled.lock().unwrap(),
            vec![(key(), DEFAULT_RETRY_INTERVAL)]
        );
    }

    #[tokio::test]
    async fn cancelled_pass_persists_nothing() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let outcome = controller(&fake).reconcile(&key(), &rx).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Cancelled);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
        assert!(fake.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_during_pass_stops_before_create() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        let (tx, rx) = watch::channel(false);
        *fake.stop_on_probe.lock().unwrap() = Some(tx);

        let outcome = controller(&fake).reconcile(&key(), &rx).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Cancelled);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 1);
        assert!(fake.created.lock().unwrap().is_empty());
        assert!(fake.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spec_deleted_mid_pass_withdraws_secret() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        *fake.spec_after_fetch.lock().unwrap() = Some(None);

        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Withdrawn);
        assert_eq!(fake.created.lock().unwrap().len(), 1);
        assert_eq!(
            *fake.withdrawn.lock().unwrap(),
            vec![(ObjectRef::new("apps", "db"), "uid-1".to_owned())]
        );
        assert!(fake.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spec_replaced_mid_pass_withdraws_and_requeues() {
        let fake = Arc::new(Fake::default());
        *fake.spec.lock().unwrap() = Some(sample_spec());
        let mut replacement = sample_spec();
        replacement.metadata.uid = "uid-2".to_owned();
        *fake.spec_after_fetch.lock().unwrap() = Some(Some(replacement));

        let outcome = controller(&fake).reconcile(&key(), &running()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Withdrawn);
        assert_eq!(fake.withdrawn.lock().unwrap()[0].1, "uid-1");
        assert_eq!(*fake.scheduled.lock().unwrap(), vec![(key(), Duration::ZERO)]);
    }

    #[tokio::test]
    async fn invalid_spec_fails_to_load() {
        let fake = Arc::new(Fake::default());
        let mut spec = sample_spec();
        spec.spec.generators[0].length = 0;
        *fake.spec.lock().unwrap() = Some(spec);

        let err = controller(&fake).reconcile(&key(), &running()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::SpecLoad { .. }));
        assert_eq!(fake.probes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn synthesize_keeps_unresolved_placeholders() {
        let mut spec = sample_spec().spec;
        spec.templates.push(KeyTemplate {
            key: "DSN".to_owned(),
            template_string: "{{ pw }}@{{ host }}".to_owned(),
        });
        let synthesis = synthesize(&spec).unwrap();
        let dsn = synthesis.data["DSN"].expose();
        assert!(dsn.ends_with("@{{ host }}"));
        assert_eq!(dsn.len(), 12 + "@{{ host }}".len());
        assert_eq!(synthesis.data["PASSWORD"].expose(), &dsn[..12]);
    }
}
