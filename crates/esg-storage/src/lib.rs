//! Key-value storage for the secrets generator.
//!
//! [`StorageBackend`] is deliberately dumb: string keys, byte values, prefix
//! listing, and one atomic primitive ([`StorageBackend::create`]). The
//! resource store in `esg-core` encodes specs and materialized secrets as JSON
//! under the `specs/` and `secrets/` prefixes on top of it.
//!
//! Backends:
//!
//! - [`MemoryBackend`]: in-memory, the default for development and tests
//! - [`RocksDbBackend`]: persistent, behind the `rocksdb-backend` feature

mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// A pluggable key-value storage backend.
///
/// Keys are `/`-separated UTF-8 paths such as `specs/default/db-credentials`.
/// Values are opaque bytes.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Read the value at `key`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` at `key`, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Write `value` at `key` only if the key is absent.
    ///
    /// Returns `Ok(true)` if the value was written and `Ok(false)` if the key
    /// already existed, in which case the stored value is untouched. Checking
    /// and writing happen as one step for all callers of the same instance.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn create(&self, key: &str, value: &[u8]) -> Result<bool, StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every key starting with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether `key` is present. Defaults to a [`get`](StorageBackend::get).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
