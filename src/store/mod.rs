//! Session persistence
//!
//! Only [`SessionRecord`]s are stored. Grids, positions, colours and
//! connection flags never leave memory.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{Config, StorageBackend};
use crate::game::{GameError, SessionId, SessionRecord};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a session store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for GameError {
    fn from(e: StoreError) -> Self {
        GameError::UpstreamUnavailable(format!("Game storage is unavailable: {}", e))
    }
}

/// Durable storage for session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove a record; removing a missing record is not an error
    async fn delete(&self, id: SessionId) -> Result<(), StoreError>;

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Every stored record, in no particular order
    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError>;
}

/// Build the store selected in configuration
pub async fn open(config: &Config) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory session store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::File => {
            let dir = config.data_dir();
            tracing::info!("Using file session store at {:?}", dir);
            Ok(Arc::new(FileStore::open(dir).await?))
        }
    }
}
