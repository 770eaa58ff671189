//! Storage abstractions: key-value stores for sessions and plans, plus the
//! append-only event log.
//!
//! The runtime only sees these traits; the file-backed implementations keep
//! every record inside the workspace and write atomically.

mod event_log;
mod file;

pub use event_log::JsonlEventLog;
pub use file::{FilePlanStore, FileSessionStore, JsonFileStore};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use volley_contract::{Event, PlanSnapshot, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Session, StoreError>;
    async fn put(&self, id: &str, session: &Session) -> Result<(), StoreError>;
    async fn del(&self, id: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<PlanSnapshot, StoreError>;
    async fn put(&self, id: &str, plan: &PlanSnapshot) -> Result<(), StoreError>;
    async fn del(&self, id: &str) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Replay stream over a session's logged events.
pub type EventReplay = Pin<Box<dyn Stream<Item = Result<Event, StoreError>> + Send>>;

/// Append-only audit log, one record per emitted event.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &Event) -> Result<(), StoreError>;

    /// Stream a session's events back for replay; empty stream when the
    /// session has never logged.
    async fn replay(&self, session_id: &str) -> Result<EventReplay, StoreError>;
}
