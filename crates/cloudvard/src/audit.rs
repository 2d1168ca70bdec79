//! Durable key-value gateway used for the handshake audit log.
//!
//! The daemon only ever calls [`PersistenceGateway::update`], once per
//! granted handshake, and never waits on the result: a failing gateway is
//! logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cloudvar_core::Handshake;

/// Key-value store over string keys and JSON values.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>, GatewayError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<(), GatewayError>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> Result<(), GatewayError>;

    /// Merges every key of `change` into the store.
    async fn update(&self, change: Map<String, Value>) -> Result<(), GatewayError>;
}

/// Errors raised by a persistence gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error on {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Corrupt store at {path}: {error}")]
    Corrupt { path: PathBuf, error: String },

    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

/// Gateway backed by a single pretty-printed JSON object file.
///
/// The whole object is kept in memory and rewritten on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store, creating the file with `{}` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Corrupt` if the file exists but is not a JSON
    /// object, `GatewayError::Io` if it cannot be read or created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let path = path.into();

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        let data = if exists {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(GatewayError::Corrupt {
                        path,
                        error: "top-level value is not an object".to_string(),
                    })
                }
                Err(e) => {
                    return Err(GatewayError::Corrupt {
                        path,
                        error: e.to_string(),
                    })
                }
            }
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(&path, e))?;
            }
            Map::new()
        };

        let store = Self {
            path,
            data: Mutex::new(data),
        };
        {
            let data = store.data.lock().await;
            store.dump(&data).await?;
        }
        debug!(path = %store.path.display(), "Opened JSON audit store");
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn dump(&self, data: &Map<String, Value>) -> Result<(), GatewayError> {
        let text = serde_json::to_string_pretty(data).map_err(|e| GatewayError::Corrupt {
            path: self.path.clone(),
            error: e.to_string(),
        })?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, error: std::io::Error) -> GatewayError {
    GatewayError::Io {
        path: path.to_path_buf(),
        error: error.to_string(),
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), GatewayError> {
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), value);
        self.dump(&data).await
    }

    async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        let mut data = self.data.lock().await;
        if data.remove(key).is_none() {
            return Err(GatewayError::KeyNotFound(key.to_string()));
        }
        self.dump(&data).await
    }

    async fn update(&self, change: Map<String, Value>) -> Result<(), GatewayError> {
        let mut data = self.data.lock().await;
        data.extend(change);
        self.dump(&data).await
    }
}

/// Builds the audit change for a granted handshake.
///
/// Keyed by `user/address/project`; a repeated handshake refreshes
/// `granted_at`.
pub fn handshake_record(handshake: &Handshake) -> Map<String, Value> {
    let mut change = Map::new();
    change.insert(
        handshake.audit_key(),
        json!({
            "project_id": handshake.project_id,
            "username": handshake.username,
            "ip": handshake.address.to_string(),
            "granted_at": Utc::now().to_rfc3339(),
        }),
    );
    change
}

/// Appends the audit record without waiting for it.
///
/// Outside a tokio runtime the record is skipped with a warning.
pub fn record_handshake(gateway: &Arc<dyn PersistenceGateway>, handshake: &Handshake) {
    let change = handshake_record(handshake);
    let key = handshake.audit_key();

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(key = %key, "No runtime available, skipping handshake audit record");
        return;
    };

    let gateway = Arc::clone(gateway);
    runtime.spawn(async move {
        if let Err(e) = gateway.update(change).await {
            warn!(key = %key, error = %e, "Failed to write handshake audit record");
        }
    });
}
