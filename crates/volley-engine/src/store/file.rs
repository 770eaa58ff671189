//! JSON-file stores with versioned wrappers and atomic writes.
//!
//! Records live under `<workspace>/sessions/<id>.json` and
//! `<workspace>/plans/<id>.json`, wrapped as `{"version": 1, "<kind>": ...}`.
//! Writes go through a temp file plus rename so a crash never leaves a
//! half-written record.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use volley_contract::{PlanSnapshot, Session};

use super::{PlanStore, SessionStore, StoreError};

const RECORD_VERSION: u64 = 1;

/// Generic JSON-file store for one record type.
pub struct JsonFileStore<T> {
    base_dir: PathBuf,
    /// Key of the record inside the versioned wrapper ("session", "plan").
    wrapper_key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

pub type FileSessionStore = JsonFileStore<Session>;
pub type FilePlanStore = JsonFileStore<PlanSnapshot>;

impl JsonFileStore<Session> {
    /// Session store rooted at `<workspace>/sessions`.
    pub fn sessions(workspace_root: impl AsRef<Path>) -> Self {
        Self::new(workspace_root.as_ref().join("sessions"), "session")
    }
}

impl JsonFileStore<PlanSnapshot> {
    /// Plan store rooted at `<workspace>/plans`.
    pub fn plans(workspace_root: impl AsRef<Path>) -> Self {
        Self::new(workspace_root.as_ref().join("plans"), "plan")
    }
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(base_dir: impl Into<PathBuf>, wrapper_key: &'static str) -> Self {
        Self {
            base_dir: base_dir.into(),
            wrapper_key,
            _marker: PhantomData,
        }
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_record_id(id)?;
        Ok(self.base_dir.join(format!("{id}.json")))
    }

    async fn get_record(&self, id: &str) -> Result<T, StoreError> {
        let path = self.record_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let wrapper: Value = serde_json::from_str(&content)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let record = wrapper
            .get(self.wrapper_key)
            .cloned()
            .ok_or_else(|| StoreError::Serialization(format!("missing {:?} field", self.wrapper_key)))?;
        serde_json::from_value(record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn put_record(&self, id: &str, value: &T) -> Result<(), StoreError> {
        let path = self.record_path(id)?;
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let mut wrapper = serde_json::Map::new();
        wrapper.insert("version".into(), RECORD_VERSION.into());
        wrapper.insert(
            self.wrapper_key.into(),
            serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?,
        );
        let content = serde_json::to_string_pretty(&Value::Object(wrapper))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp_path = self
            .base_dir
            .join(format!(".{id}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            tokio::fs::write(&tmp_path, content.as_bytes()).await?;
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn del_record(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_records(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !stem.starts_with('.') {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Record ids become file names; reject anything that could leave the store
/// directory.
fn validate_record_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidId("empty id".into()));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.contains('\0') {
        return Err(StoreError::InvalidId(format!(
            "id contains path characters: {id:?}"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(StoreError::InvalidId(format!(
            "id contains control characters: {id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl SessionStore for JsonFileStore<Session> {
    async fn get(&self, id: &str) -> Result<Session, StoreError> {
        self.get_record(id).await
    }

    async fn put(&self, id: &str, session: &Session) -> Result<(), StoreError> {
        self.put_record(id, session).await
    }

    async fn del(&self, id: &str) -> Result<(), StoreError> {
        self.del_record(id).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.list_records().await
    }
}

#[async_trait]
impl PlanStore for JsonFileStore<PlanSnapshot> {
    async fn get(&self, id: &str) -> Result<PlanSnapshot, StoreError> {
        self.get_record(id).await
    }

    async fn put(&self, id: &str, plan: &PlanSnapshot) -> Result<(), StoreError> {
        self.put_record(id, plan).await
    }

    async fn del(&self, id: &str) -> Result<(), StoreError> {
        self.del_record(id).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.list_records().await
    }
}
