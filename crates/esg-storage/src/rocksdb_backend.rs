//! `RocksDB` storage backend.
//!
//! Wraps the `rocksdb` crate behind the [`StorageBackend`] trait. Every call
//! runs on the Tokio blocking pool since `RocksDB` is a synchronous library.
//!
//! `RocksDB` has no native insert-if-absent on a plain database, so
//! [`StorageBackend::create`] serializes its read-then-write under a process
//! local mutex. Only one process may open the database directory at a time,
//! which makes that mutex sufficient.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rocksdb::{DBWithThreadMode, MultiThreaded, Options};

use crate::{StorageBackend, StorageError};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use esg_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/esg/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    create_lock: Arc<Mutex<()>>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open or create the
    /// database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "rocksdb storage opened");

        Ok(Self {
            db: Arc::new(db),
            create_lock: Arc::new(Mutex::new(())),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run `op` on the blocking pool, mapping a join failure through `on_join`.
async fn blocking<T, F>(
    op: F,
    on_join: impl FnOnce(String) -> StorageError,
) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| on_join(format!("blocking task panicked: {e}")))?
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let owned = key.to_owned();
        let join_key = key.to_owned();
        blocking(
            move || {
                db.get(owned.as_bytes()).map_err(|e| StorageError::Read {
                    key: owned,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Read { key: join_key, reason },
        )
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let owned = key.to_owned();
        let join_key = key.to_owned();
        let value = value.to_vec();
        blocking(
            move || {
                db.put(owned.as_bytes(), &value)
                    .map_err(|e| StorageError::Write {
                        key: owned,
                        reason: e.to_string(),
                    })
            },
            |reason| StorageError::Write { key: join_key, reason },
        )
        .await
    }

    async fn create(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        let db = Arc::clone(&self.db);
        let lock = Arc::clone(&self.create_lock);
        let owned = key.to_owned();
        let join_key = key.to_owned();
        let value = value.to_vec();
        blocking(
            move || {
                let _guard = lock.lock().map_err(|e| StorageError::Write {
                    key: owned.clone(),
                    reason: format!("create lock poisoned: {e}"),
                })?;
                let existing = db.get(owned.as_bytes()).map_err(|e| StorageError::Read {
                    key: owned.clone(),
                    reason: e.to_string(),
                })?;
                if existing.is_some() {
                    return Ok(false);
                }
                db.put(owned.as_bytes(), &value)
                    .map_err(|e| StorageError::Write {
                        key: owned,
                        reason: e.to_string(),
                    })?;
                Ok(true)
            },
            |reason| StorageError::Write { key: join_key, reason },
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let owned = key.to_owned();
        let join_key = key.to_owned();
        blocking(
            move || {
                db.delete(owned.as_bytes()).map_err(|e| StorageError::Delete {
                    key: owned,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Delete { key: join_key, reason },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let db = Arc::clone(&self.db);
        let owned = prefix.to_owned();
        let join_prefix = prefix.to_owned();
        blocking(
            move || {
                let iter = db.iterator(rocksdb::IteratorMode::From(
                    owned.as_bytes(),
                    rocksdb::Direction::Forward,
                ));

                let mut keys = Vec::new();
                for item in iter {
                    let (k, _) = item.map_err(|e| StorageError::List {
                        prefix: owned.clone(),
                        reason: e.to_string(),
                    })?;
                    let key = String::from_utf8(k.to_vec()).map_err(|e| {
                        StorageError::InvalidKey {
                            reason: e.to_string(),
                        }
                    })?;
                    if !key.starts_with(&owned) {
                        break;
                    }
                    keys.push(key);
                }
                Ok(keys)
            },
            |reason| StorageError::List {
                prefix: join_prefix,
                reason,
            },
        )
        .await
    }
}
