//! Watches the serve root and publishes model files that appear there by
//! other means (manual copies, external exporters).

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::job::PublishedPointer;
use crate::services::publisher::ResultPublisher;
use crate::services::store::{StateStore, StoreError};

const MODEL_EXTENSIONS: &[&str] = &["glb", "gltf"];
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Newest model file seen so far and since when its size has not changed.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size: u64,
    stable_since: Instant,
}

pub struct FinalizeWatcher {
    store: Arc<dyn StateStore>,
    serve_dir: PathBuf,
    base_url: String,
    stable_for: Duration,
    candidate: Option<Candidate>,
}

impl FinalizeWatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        serve_dir: impl Into<PathBuf>,
        base_url: &str,
        stable_for: Duration,
    ) -> Self {
        Self {
            store,
            serve_dir: serve_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            stable_for,
            candidate: None,
        }
    }

    /// One scan. Returns the pointer if this scan published one.
    pub async fn scan_once(&mut self) -> Result<Option<PublishedPointer>, FinalizeError> {
        let Some((path, size)) = newest_model(&self.serve_dir).await? else {
            self.candidate = None;
            return Ok(None);
        };

        let candidate = match self.candidate.take() {
            Some(c) if c.path == path && c.size == size => c,
            _ => Candidate {
                path,
                size,
                stable_since: Instant::now(),
            },
        };
        let stable = candidate.stable_since.elapsed() >= self.stable_for;
        let path = candidate.path.clone();
        self.candidate = Some(candidate);
        if !stable {
            return Ok(None);
        }

        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(None);
        };
        let url = format!("{}/{}", self.base_url, name);
        let current = self.store.pointer().await?;
        if current.is_some_and(|p| p.servable_url == url) {
            return Ok(None);
        }

        let pointer = PublishedPointer {
            servable_url: url,
            published_at: Utc::now(),
            run_id: None,
            job_id: None,
        };
        self.store.publish(&pointer).await?;
        if let Err(e) = self
            .store
            .set_status(&ResultPublisher::success_message(&pointer.servable_url))
            .await
        {
            tracing::warn!(error = %e, "Failed to update status surface");
        }
        tracing::info!(path = %path.display(), url = %pointer.servable_url, "Finalized model file");
        Ok(Some(pointer))
    }

    /// Scan every second until cancelled. Scan errors are logged and retried.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(dir = %self.serve_dir.display(), "Finalize watcher started");
        loop {
            if let Err(e) = self.scan_once().await {
                tracing::warn!(error = %e, "Finalize scan failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            }
        }
        tracing::info!("Finalize watcher stopped");
    }
}

fn is_model_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('.'));
    let model = path
        .extension()
        .is_some_and(|ext| MODEL_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)));
    model && !hidden
}

/// Most recently modified model file directly under `dir`, with its size.
async fn newest_model(dir: &Path) -> Result<Option<(PathBuf, u64)>, std::io::Error> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut newest: Option<(PathBuf, u64, SystemTime)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_model_file(&path) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().map_or(true, |(_, _, m)| modified > *m) {
            newest = Some((path, meta.len(), modified));
        }
    }
    Ok(newest.map(|(path, size, _)| (path, size)))
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("scanning serve root failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
