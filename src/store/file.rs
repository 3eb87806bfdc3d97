//! JSON file session store
//!
//! One `<id>.json` file per session. Writes go to a temporary file that is
//! synced and then renamed over the target, so a crash never leaves a
//! half-written record behind.

use super::{SessionStore, StoreError};
use crate::game::{SessionId, SessionRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read_record(path: &Path) -> Result<Option<SessionRecord>, StoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.id());
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(record)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        tracing::trace!("Saved session {} to {:?}", record.id(), path);
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Self::read_record(&self.record_path(id)).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping unreadable session file {:?}: {}", path, e),
            }
        }

        Ok(records)
    }
}
