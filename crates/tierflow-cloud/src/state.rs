//! Persisted engine state
//!
//! The local engine records every resource it has applied in
//! `.tierflow/state.json`. A re-run compares requests against these records,
//! which is what turns a second `tier up` into a no-op.

use crate::action::Attributes;
use crate::engine::CreateRequest;
use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".tierflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;

/// Contents of `state.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// Records keyed by [`CreateRequest::key`]
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn get(&self, key: &str) -> Option<&ResourceRecord> {
        self.resources.get(key)
    }

    pub fn record(&mut self, key: String, record: ResourceRecord) {
        self.updated_at = record.updated_at;
        self.resources.insert(key, record);
    }
}

/// What the engine remembers about one applied resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub kind: String,
    /// Properties of the last applied request
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Attributes published for the resource
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(id: impl Into<String>, request: &CreateRequest, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: request.kind.clone(),
            properties: request.properties.clone(),
            attributes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `request` asks for exactly what was last applied
    pub fn is_current(&self, request: &CreateRequest) -> bool {
        self.kind == request.kind && self.properties == request.properties
    }

    /// Replace properties and attributes in place, keeping identity
    pub fn revise(&mut self, request: &CreateRequest, attributes: Attributes) {
        self.properties = request.properties.clone();
        self.attributes = attributes;
        self.updated_at = Utc::now();
    }
}

/// Reads and writes the state directory of one project
#[derive(Debug, Clone)]
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    /// Path of `state.json`
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub async fn load(&self) -> Result<StateFile> {
        let content = match fs::read_to_string(self.state_path()).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(e) => return Err(e.into()),
        };

        let state: StateFile = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "state file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Write the state through a temporary file. The previous file is kept
    /// as `state.json.backup`.
    pub async fn save(&self, state: &StateFile) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.state_path();
        let staging = self.dir.join(format!("{STATE_FILE}.tmp"));
        fs::write(&staging, serde_json::to_vec_pretty(state)?).await?;

        match fs::copy(&path, self.dir.join(STATE_BACKUP)).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::rename(&staging, &path).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the project lock. A lock older than an hour is treated as
    /// abandoned and replaced.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(LOCK_FILE);

        if let Some(holder) = self.read_lock(&path).await? {
            let age = Utc::now().signed_duration_since(holder.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(CloudError::LockError(format!(
                    "state is locked by {} since {}",
                    holder.holder, holder.acquired_at
                )));
            }
            tracing::warn!(holder = %holder.holder, "Replacing stale state lock");
            fs::remove_file(&path).await?;
        }

        let holder = LockHolder {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CloudError::LockError(
                    "state was locked by another run".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&serde_json::to_vec_pretty(&holder)?).await?;
        file.flush().await?;

        tracing::debug!(path = %path.display(), "Acquired state lock");
        Ok(StateLock {
            path,
            released: false,
        })
    }

    async fn read_lock(&self, path: &Path) -> Result<Option<LockHolder>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockHolder {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// Held project lock, removed on release or drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Released state lock");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
