//! Instance-scoped state
//!
//! Each resource instance owns a small key/value document that survives the
//! orchestrator's re-invocations. The engine keeps nothing in memory between
//! calls; names, async-operation handles and resource ids all live here.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

const STATE_VERSION: u32 = 1;

/// Reserved keys
pub mod keys {
    pub const KIND: &str = "kind";
    pub const RESOURCE_GROUP: &str = "resource_group";
    pub const NAME: &str = "name";
    pub const RESOURCE_ID: &str = "resource_id";
    /// The resource pre-existed and was adopted rather than created
    pub const EXTERNAL: &str = "external";
    /// A mutating create was submitted by this instance
    pub const SUBMITTED: &str = "submitted";
    pub const ASYNC_OPERATION: &str = "async_operation";
    /// What-if previews poll independently of create/update/delete
    pub const WHAT_IF_OPERATION: &str = "what_if_operation";
    /// Drift baseline: ids recorded at the last successful apply
    pub const RESOURCE_IDS: &str = "resource_ids";
    /// Last computed drift state
    pub const STATE: &str = "state";
    pub const WHAT_IF_STARTED_AT: &str = "what_if_started_at";
}

/// Key/value store scoped to one resource instance
#[async_trait]
pub trait InstanceStateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key; called once the resource is gone
    async fn clear(&self) -> Result<()>;
}

/// Read a typed value
pub async fn load<T: DeserializeOwned>(
    store: &dyn InstanceStateStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CloudError::StateError(format!("{}: {}", key, e))),
    }
}

/// Write a typed value
pub async fn save<T: Serialize + ?Sized>(
    store: &dyn InstanceStateStore,
    key: &str,
    value: &T,
) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

pub async fn flag(store: &dyn InstanceStateStore, key: &str) -> Result<bool> {
    Ok(load::<bool>(store, key).await?.unwrap_or(false))
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, serde_json::Value>>> {
        self.values
            .lock()
            .map_err(|_| CloudError::StateError("state store lock poisoned".to_string()))
    }
}

#[async_trait]
impl InstanceStateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Persisted instance document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDocument {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    pub values: BTreeMap<String, serde_json::Value>,
}

impl Default for InstanceDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }
}

/// File-backed store: one JSON document per instance
///
/// Every write rewrites the document and keeps the previous version as
/// `<instance>.json.backup`.
pub struct FileStateStore {
    state_dir: PathBuf,
    instance_id: String,
    io: tokio::sync::Mutex<()>,
}

impl FileStateStore {
    pub fn new(state_dir: impl AsRef<Path>, instance_id: impl Into<String>) -> Result<Self> {
        let instance_id = instance_id.into();
        if instance_id.is_empty()
            || instance_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        {
            return Err(CloudError::InvalidConfig(format!(
                "invalid instance id: {:?}",
                instance_id
            )));
        }

        Ok(Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            instance_id,
            io: tokio::sync::Mutex::new(()),
        })
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.json", self.instance_id))
    }

    /// Get the backup file path
    fn backup_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("{}.json.backup", self.instance_id))
    }

    /// Load the current document
    pub async fn load_document(&self) -> Result<InstanceDocument> {
        let path = self.state_path();
        if !fs::try_exists(&path).await? {
            tracing::debug!("State file not found, returning empty state");
            return Ok(InstanceDocument::default());
        }

        let content = fs::read_to_string(&path).await?;
        let document: InstanceDocument = serde_json::from_str(&content)?;

        if document.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                document.version, STATE_VERSION
            )));
        }

        Ok(document)
    }

    async fn save_document(&self, document: &mut InstanceDocument) -> Result<()> {
        fs::create_dir_all(&self.state_dir).await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if fs::try_exists(&path).await? {
            fs::copy(&path, &backup).await?;
        }

        document.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(document)?;
        let staging = self
            .state_dir
            .join(format!(".{}.json.tmp", self.instance_id));
        fs::write(&staging, content).await?;
        fs::rename(&staging, &path).await?;

        tracing::debug!(
            "Saved state for {} with {} keys",
            self.instance_id,
            document.values.len()
        );
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, serde_json::Value>) + Send,
    {
        let _guard = self.io.lock().await;
        let mut document = self.load_document().await?;
        f(&mut document.values);
        self.save_document(&mut document).await
    }
}

#[async_trait]
impl InstanceStateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let _guard = self.io.lock().await;
        Ok(self.load_document().await?.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let key = key.to_string();
        self.update(move |values| {
            values.insert(key, value);
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.update(|values| values.clear()).await
    }
}
