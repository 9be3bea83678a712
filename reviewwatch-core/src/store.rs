//! Persistent key-value storage and the typed change store built on it.
//!
//! # Storage layout
//!
//! ```text
//! changes  JSON array of TrackedChange (transient flags stripped)
//! updated  JSON array of TrackedChange (the pending update buffer)
//! options  JSON ConnectionOptions
//! ```
//!
//! [`ChangeStore`] is the single writer for these keys: every
//! read-modify-write goes through its write lock, so a cycle's final write
//! and a viewer's add/remove can never clobber each other.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::{io_err, CoreError};
use crate::types::{ConnectionOptions, TrackedChange};

pub const CHANGES_KEY: &str = "changes";
pub const UPDATED_KEY: &str = "updated";
pub const OPTIONS_KEY: &str = "options";

// ---------------------------------------------------------------------------
// 1. Key-value primitive
// ---------------------------------------------------------------------------

/// Opaque asynchronous string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), CoreError>;
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CoreError> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Writes use the `.tmp` + rename pattern, so a crash mid-write leaves the
/// previous document intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, CoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new())
            }
            Err(err) => return Err(io_err(&self.path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|source| CoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_owned(), value);
        self.persist(&values).await
    }
}

// ---------------------------------------------------------------------------
// 2. Typed change store
// ---------------------------------------------------------------------------

/// Typed access to tracked changes, the pending update buffer and options.
#[derive(Clone)]
pub struct ChangeStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl ChangeStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Tracked changes in stored order; `[]` when unset, empty or unparseable.
    pub async fn get_changes(&self) -> Result<Vec<TrackedChange>, CoreError> {
        self.read_list(CHANGES_KEY).await
    }

    /// Overwrite the tracked set wholesale.
    pub async fn save_changes(&self, changes: &[TrackedChange]) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_changes(changes).await
    }

    /// Atomic read-modify-write of the tracked set.
    ///
    /// `edit` sees the currently persisted list; whatever it leaves behind is
    /// written back and returned alongside its result.
    pub async fn update_changes<F, R>(&self, edit: F) -> Result<(Vec<TrackedChange>, R), CoreError>
    where
        F: FnOnce(&mut Vec<TrackedChange>) -> R + Send,
        R: Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut changes = self.get_changes().await?;
        let result = edit(&mut changes);
        self.write_changes(&changes).await?;
        Ok((changes, result))
    }

    /// Connection options; the zero value when unset.
    pub async fn get_options(&self) -> Result<ConnectionOptions, CoreError> {
        Ok(self
            .read_json::<ConnectionOptions>(OPTIONS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_options(&self, options: &ConnectionOptions) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        self.kv
            .set(OPTIONS_KEY, serde_json::to_string(options)?)
            .await
    }

    /// Whether the persisted options pass [`ConnectionOptions::is_valid`].
    pub async fn is_config_set(&self) -> Result<bool, CoreError> {
        Ok(self.get_options().await?.is_valid())
    }

    /// Take the pending update buffer, leaving it empty.
    pub async fn get_updated_changes(&self) -> Result<Vec<TrackedChange>, CoreError> {
        let _guard = self.write_lock.lock().await;
        let updated = self.read_list(UPDATED_KEY).await?;
        self.kv.set(UPDATED_KEY, "[]".to_owned()).await?;
        Ok(updated)
    }

    /// Replace the pending update buffer; `None` clears it.
    pub async fn save_updated_changes(
        &self,
        updated: Option<&[TrackedChange]>,
    ) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string(updated.unwrap_or_default())?;
        self.kv.set(UPDATED_KEY, json).await
    }

    /// Empty both the tracked set and the pending buffer.
    pub async fn clear(&self) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        self.kv.set(CHANGES_KEY, "[]".to_owned()).await?;
        self.kv.set(UPDATED_KEY, "[]".to_owned()).await
    }

    /// A change with neither subject nor status has never been fetched.
    pub fn is_change_empty(change: &TrackedChange) -> bool {
        change.subject.is_none() && change.status.is_none()
    }

    async fn write_changes(&self, changes: &[TrackedChange]) -> Result<(), CoreError> {
        let persisted: Vec<TrackedChange> =
            changes.iter().map(TrackedChange::without_transient).collect();
        self.kv
            .set(CHANGES_KEY, serde_json::to_string(&persisted)?)
            .await
    }

    async fn read_list(&self, key: &str) -> Result<Vec<TrackedChange>, CoreError> {
        Ok(self.read_json::<Vec<TrackedChange>>(key).await?.unwrap_or_default())
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(key, error = %err, "ignoring unparseable stored value");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ChangeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStore").finish_non_exhaustive()
    }
}
