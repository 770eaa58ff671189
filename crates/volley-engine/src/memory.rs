//! Structured memory persistence. The middleware reads it; writes go only
//! through the `update_memory` tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use volley_contract::{MemoryEntry, MemorySource};

use crate::store::StoreError;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn list(&self, source: MemorySource) -> Result<Vec<MemoryEntry>, StoreError>;

    /// Case-insensitive substring search over content and tags, both sources.
    async fn search(&self, query: &str) -> Result<Vec<MemoryEntry>, StoreError>;

    async fn add(&self, entry: MemoryEntry) -> Result<(), StoreError>;
    async fn update(&self, entry: MemoryEntry) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// One JSON file per source under `<workspace>/memory/`.
pub struct FileMemoryStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            base_dir: workspace_root.as_ref().join("memory"),
            write_lock: Mutex::new(()),
        }
    }

    fn source_path(&self, source: MemorySource) -> PathBuf {
        let name = match source {
            MemorySource::User => "user.json",
            MemorySource::Project => "project.json",
        };
        self.base_dir.join(name)
    }

    async fn read_source(&self, source: MemorySource) -> Result<Vec<MemoryEntry>, StoreError> {
        let path = self.source_path(source);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn write_source(
        &self,
        source: MemorySource,
        entries: &[MemoryEntry],
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.source_path(source);
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn list(&self, source: MemorySource) -> Result<Vec<MemoryEntry>, StoreError> {
        self.read_source(source).await
    }

    async fn search(&self, query: &str) -> Result<Vec<MemoryEntry>, StoreError> {
        let needle = query.to_lowercase();
        let mut out = Vec::new();
        for source in [MemorySource::User, MemorySource::Project] {
            for entry in self.read_source(source).await? {
                let hit = entry.content.to_lowercase().contains(&needle)
                    || entry.tags.iter().any(|t| t.to_lowercase().contains(&needle));
                if hit {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    async fn add(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_source(entry.source).await?;
        if entries.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::InvalidId(format!(
                "memory entry already exists: {}",
                entry.id
            )));
        }
        let source = entry.source;
        entries.push(entry);
        self.write_source(source, &entries).await
    }

    async fn update(&self, entry: MemoryEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let source = entry.source;
        let mut entries = self.read_source(source).await?;
        let Some(slot) = entries.iter_mut().find(|e| e.id == entry.id) else {
            return Err(StoreError::NotFound(entry.id.clone()));
        };
        let created_at = slot.created_at;
        *slot = MemoryEntry {
            created_at,
            updated_at: Utc::now(),
            ..entry
        };
        self.write_source(source, &entries).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        for source in [MemorySource::User, MemorySource::Project] {
            let mut entries = self.read_source(source).await?;
            let before = entries.len();
            entries.retain(|e| e.id != id);
            if entries.len() != before {
                return self.write_source(source, &entries).await;
            }
        }
        Err(StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use volley_contract::MemoryKind;

    #[tokio::test]
    async fn add_list_search_delete_cycle() {
        let ws = TempDir::new().unwrap();
        let store = FileMemoryStore::new(ws.path());

        let mut entry = MemoryEntry::new(
            "m1",
            MemoryKind::Preference,
            "Answer in short paragraphs",
            MemorySource::User,
        );
        entry.tags = vec!["style".into()];
        store.add(entry.clone()).await.unwrap();
        store
            .add(MemoryEntry::new(
                "m2",
                MemoryKind::Fact,
                "Project targets Linux only",
                MemorySource::Project,
            ))
            .await
            .unwrap();

        assert_eq!(store.list(MemorySource::User).await.unwrap().len(), 1);
        assert_eq!(store.search("linux").await.unwrap().len(), 1);
        assert_eq!(store.search("STYLE").await.unwrap().len(), 1);

        store.delete("m1").await.unwrap();
        assert!(store.list(MemorySource::User).await.unwrap().is_empty());
        assert!(store.delete("m1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected_and_update_keeps_created_at() {
        let ws = TempDir::new().unwrap();
        let store = FileMemoryStore::new(ws.path());

        let entry = MemoryEntry::new("m1", MemoryKind::Fact, "v1", MemorySource::Project);
        let created = entry.created_at;
        store.add(entry.clone()).await.unwrap();
        assert!(store.add(entry.clone()).await.is_err());

        let mut changed = entry;
        changed.content = "v2".into();
        store.update(changed).await.unwrap();

        let entries = store.list(MemorySource::Project).await.unwrap();
        assert_eq!(entries[0].content, "v2");
        assert_eq!(entries[0].created_at, created);
        assert!(entries[0].updated_at >= created);
    }
}
