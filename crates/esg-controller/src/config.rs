//! Controller configuration.
//!
//! Loaded from `ESG_*` environment variables with defaults. Unset variables
//! fall back to their default; set but unparseable ones are an error so a
//! typo never silently turns into a default.

use std::net::SocketAddr;
use std::time::Duration;

use esg_core::controller::ReconcileConfig;

const DEFAULT_PORT: u16 = 8300;

/// Errors from reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set to something that does not parse.
    #[error("{var}='{value}' is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Resync and retry timing of reconcile passes.
    pub reconcile: ReconcileConfig,
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Upper bound on the error backoff of a failing spec.
    pub max_backoff: Duration,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    ///
    /// - `ESG_BIND_ADDR`: full bind address (default `127.0.0.1:8300`)
    /// - `PORT`: bind `0.0.0.0:PORT` when `ESG_BIND_ADDR` is unset
    /// - `ESG_STORAGE`: `memory` or `rocksdb` (default `memory`)
    /// - `ESG_STORAGE_PATH`: path for persistent backends (default `./data`)
    /// - `ESG_LOG_LEVEL`: log filter (default `info`)
    /// - `ESG_RESYNC_INTERVAL`: seconds between re-probes (default `30`)
    /// - `ESG_RETRY_INTERVAL`: seconds before re-probing after a create (default `60`)
    /// - `ESG_WORKERS`: concurrent reconcile workers (default `4`)
    /// - `ESG_MAX_BACKOFF`: cap in seconds on error backoff (default `300`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Priority: ESG_BIND_ADDR > PORT > default.
        let bind_addr = if let Some(addr) = lookup("ESG_BIND_ADDR") {
            parse("ESG_BIND_ADDR", &addr)?
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = parse("PORT", &port)?;
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        };

        let storage_path = lookup("ESG_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned());
        let storage_backend = match lookup("ESG_STORAGE") {
            None => StorageBackendType::Memory,
            Some(kind) => match kind.to_lowercase().as_str() {
                "memory" => StorageBackendType::Memory,
                "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "ESG_STORAGE",
                        value: kind,
                        reason: "expected 'memory' or 'rocksdb'".to_owned(),
                    });
                }
            },
        };

        let log_level = lookup("ESG_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let defaults = ReconcileConfig::default();
        let reconcile = ReconcileConfig {
            resync_interval: seconds(&lookup, "ESG_RESYNC_INTERVAL", defaults.resync_interval)?,
            retry_interval: seconds(&lookup, "ESG_RETRY_INTERVAL", defaults.retry_interval)?,
        };

        let workers = match lookup("ESG_WORKERS") {
            Some(value) => {
                let workers: usize = parse("ESG_WORKERS", &value)?;
                if workers == 0 {
                    return Err(ConfigError::Invalid {
                        var: "ESG_WORKERS",
                        value,
                        reason: "at least one worker is required".to_owned(),
                    });
                }
                workers
            }
            None => 4,
        };

        let max_backoff = seconds(&lookup, "ESG_MAX_BACKOFF", Duration::from_secs(300))?;

        Ok(Self {
            bind_addr,
            storage_backend,
            log_level,
            reconcile,
            workers,
            max_backoff,
        })
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

fn seconds<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => parse(var, &value).map(Duration::from_secs),
        None => Ok(default),
    }
}
