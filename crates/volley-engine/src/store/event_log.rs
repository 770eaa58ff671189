//! Append-only JSONL event log, one file per session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use volley_contract::Event;

use super::{EventLog, EventReplay, StoreError};

/// Events land under `<workspace>/events/<session_id>.jsonl`, one JSON
/// object per line.
pub struct JsonlEventLog {
    base_dir: PathBuf,
    // Serializes appends so concurrent turns on different sessions cannot
    // interleave partial lines through a shared handle cache.
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            base_dir: workspace_root.as_ref().join("events"),
            write_lock: Mutex::new(()),
        }
    }

    fn log_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        if session_id.is_empty()
            || session_id.contains('/')
            || session_id.contains('\\')
            || session_id.contains("..")
        {
            return Err(StoreError::InvalidId(format!(
                "session id unsafe for log path: {session_id:?}"
            )));
        }
        Ok(self.base_dir.join(format!("{session_id}.jsonl")))
    }
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: &Event) -> Result<(), StoreError> {
        let path = self.log_path(&event.session_id)?;
        let mut line = serde_json::to_vec(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    async fn replay(&self, session_id: &str) -> Result<EventReplay, StoreError> {
        let path = self.log_path(session_id)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Box::pin(stream::empty()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let replay = async_stream::try_stream! {
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = serde_json::from_str(&line)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                yield event;
            }
        };
        Ok(Box::pin(replay))
    }
}
