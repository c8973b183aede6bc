//! Shared StatusSurface / PublishedPointer state.
//!
//! Writes are whole-value replacements with no locking: readers may see a
//! stale value but never a torn one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

use crate::models::job::PublishedPointer;

const STATUS_FILE: &str = "status.txt";
const POINTER_FILE: &str = "last_model_url.txt";
const POINTER_META_FILE: &str = "last_model.json";

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Overwrite the human-readable status text.
    async fn set_status(&self, text: &str) -> Result<(), StoreError>;

    async fn status(&self) -> Result<Option<String>, StoreError>;

    /// Replace the published pointer (last writer wins).
    async fn publish(&self, pointer: &PublishedPointer) -> Result<(), StoreError>;

    async fn pointer(&self) -> Result<Option<PublishedPointer>, StoreError>;
}

/// Durable store backed by small text files in a state directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    /// One line: the URL of the latest published artifact.
    pub fn pointer_path(&self) -> PathBuf {
        self.dir.join(POINTER_FILE)
    }

    fn pointer_meta_path(&self) -> PathBuf {
        self.dir.join(POINTER_META_FILE)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn set_status(&self, text: &str) -> Result<(), StoreError> {
        write_atomic(&self.status_path(), text.as_bytes()).await
    }

    async fn status(&self) -> Result<Option<String>, StoreError> {
        read_optional(&self.status_path()).await
    }

    async fn publish(&self, pointer: &PublishedPointer) -> Result<(), StoreError> {
        let meta = serde_json::to_vec_pretty(pointer)?;
        write_atomic(&self.pointer_meta_path(), &meta).await?;
        write_atomic(&self.pointer_path(), pointer.servable_url.as_bytes()).await
    }

    async fn pointer(&self) -> Result<Option<PublishedPointer>, StoreError> {
        let Some(url) = read_optional(&self.pointer_path()).await? else {
            return Ok(None);
        };
        let url = url.trim().to_string();
        if url.is_empty() {
            return Ok(None);
        }

        // Metadata only counts when it describes the URL in the pointer file;
        // the pointer file is the source of truth for other writers.
        let meta = match read_optional(&self.pointer_meta_path()).await? {
            Some(raw) => serde_json::from_str::<PublishedPointer>(&raw)
                .ok()
                .filter(|meta| meta.servable_url == url),
            None => None,
        };

        Ok(Some(meta.unwrap_or_else(|| PublishedPointer {
            servable_url: url,
            published_at: chrono::Utc::now(),
            run_id: None,
            job_id: None,
        })))
    }
}

/// In-process store for embedding and tests.
#[derive(Default)]
pub struct MemoryStateStore {
    status: RwLock<Option<String>>,
    pointer: RwLock<Option<PublishedPointer>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set_status(&self, text: &str) -> Result<(), StoreError> {
        *self.status.write().map_err(|_| StoreError::Poisoned)? = Some(text.to_string());
        Ok(())
    }

    async fn status(&self) -> Result<Option<String>, StoreError> {
        Ok(self.status.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    async fn publish(&self, pointer: &PublishedPointer) -> Result<(), StoreError> {
        *self.pointer.write().map_err(|_| StoreError::Poisoned)? = Some(pointer.clone());
        Ok(())
    }

    async fn pointer(&self) -> Result<Option<PublishedPointer>, StoreError> {
        Ok(self.pointer.read().map_err(|_| StoreError::Poisoned)?.clone())
    }
}

/// Write `data` to a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("State lock poisoned")]
    Poisoned,
}
