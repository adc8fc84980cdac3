//! Error types for `esg-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger: generator names, object references, or storage keys. Generated
//! values and digests never appear in error messages.

use esg_storage::StorageError;

/// Errors from the random source.
#[derive(Debug, thiserror::Error)]
pub enum RandomError {
    /// The alphabet to draw from is empty.
    #[error("charset is empty")]
    EmptyCharset,

    /// The alphabet has more symbols than a single 32-bit draw can index.
    #[error("charset has {size} symbols, more than a 32-bit draw can index")]
    CharsetTooLarge { size: usize },

    /// The OS entropy source failed.
    #[error("entropy source failed: {reason}")]
    Entropy { reason: String },
}

/// Errors from the PBKDF2 hash transform.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The hasher could not be built from the supplied parameters.
    #[error("hasher construction failed: {reason}")]
    Construction { reason: String },

    /// Salt generation or digest computation failed.
    #[error("digest computation failed: {reason}")]
    Compute { reason: String },

    /// An encoded digest could not be parsed for verification.
    #[error("malformed encoded digest: {reason}")]
    MalformedDigest { reason: String },
}

/// Errors from evaluating a single generator.
///
/// Always names the generator so the failure can be traced back to the spec.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// Drawing the raw value failed.
    #[error("generator '{generator}': {source}")]
    Random {
        generator: String,
        #[source]
        source: RandomError,
    },

    /// Hashing the raw value failed.
    #[error("generator '{generator}': {source}")]
    Hash {
        generator: String,
        #[source]
        source: HashError,
    },
}

impl GeneratorError {
    /// Name of the generator that failed.
    #[must_use]
    pub fn generator(&self) -> &str {
        match self {
            Self::Random { generator, .. } | Self::Hash { generator, .. } => generator,
        }
    }
}

/// Errors from decoding or validating a declared spec.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// The generator's `type` is not one this system knows how to evaluate.
    #[error("generator '{generator}' has unsupported type '{kind}'")]
    UnsupportedGeneratorType { generator: String, kind: String },

    /// A generator declaration violates an invariant.
    #[error("generator '{generator}' is invalid: {reason}")]
    InvalidGenerator { generator: String, reason: String },

    /// Two generators share a name.
    #[error("generator name '{generator}' is declared more than once")]
    DuplicateGenerator { generator: String },

    /// A template declaration violates an invariant.
    #[error("template #{index} is invalid: {reason}")]
    InvalidTemplate { index: usize, reason: String },

    /// The target secret identity is invalid.
    #[error("invalid target secret: {reason}")]
    InvalidTarget { reason: String },

    /// The object metadata is invalid.
    #[error("invalid metadata: {reason}")]
    InvalidMetadata { reason: String },
}

/// Errors from the resource store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("{kind} '{object}' not found")]
    NotFound { kind: &'static str, object: String },

    /// An object with this identity already exists.
    #[error("{kind} '{object}' already exists")]
    AlreadyExists { kind: &'static str, object: String },

    /// A stored object could not be encoded or decoded.
    #[error("{kind} '{object}' could not be (de)serialized: {reason}")]
    Codec {
        kind: &'static str,
        object: String,
        reason: String,
    },

    /// A spec failed validation on its way in or out of the store.
    #[error("spec rejected: {0}")]
    InvalidSpec(#[from] SpecError),

    /// The underlying storage backend returned an error.
    #[error("store backend error: {0}")]
    Backend(#[from] StorageError),
}

impl StoreError {
    /// Whether this is the not-found class of error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is the already-exists class of error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Errors that fail a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The spec could not be fetched for a reason other than absence.
    #[error("failed to load spec '{spec}': {source}")]
    SpecLoad {
        spec: String,
        #[source]
        source: StoreError,
    },

    /// Probing for the materialized secret failed.
    #[error("failed to probe secret '{target}': {source}")]
    StoreProbeFailed {
        target: String,
        #[source]
        source: StoreError,
    },

    /// Every declared generator failed, so there is nothing to render.
    #[error("all {} generator(s) failed; first: {}", .failures.len(), first_failure(.failures))]
    NoUsableOutputs { failures: Vec<GeneratorError> },

    /// The blocking evaluation task did not complete.
    #[error("generator evaluation task failed: {reason}")]
    Evaluation { reason: String },

    /// Persisting the materialized secret failed.
    #[error("failed to create secret '{target}': {source}")]
    CreateFailed {
        target: String,
        #[source]
        source: StoreError,
    },

    /// A secret created for a spec that vanished mid-pass could not be removed.
    #[error("failed to withdraw secret '{target}': {source}")]
    WithdrawFailed {
        target: String,
        #[source]
        source: StoreError,
    },
}

fn first_failure(failures: &[GeneratorError]) -> String {
    failures
        .first()
        .map_or_else(|| "none".to_owned(), ToString::to_string)
}
