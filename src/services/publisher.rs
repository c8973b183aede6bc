//! Publication of the latest successful artifact.
//!
//! The primary artifact is staged into the serve root under its own file
//! name, then the pointer is replaced. Concurrent runs race and the last
//! one to publish stays visible; the pointer metadata names the run that
//! produced it.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{Artifact, PublishedPointer};
use crate::services::static_server::StaticServer;
use crate::services::store::{StateStore, StoreError};

pub struct ResultPublisher {
    store: Arc<dyn StateStore>,
    serve_dir: PathBuf,
    base_url: String,
    auto_serve: bool,
    static_server: Arc<StaticServer>,
}

impl ResultPublisher {
    pub fn new(
        store: Arc<dyn StateStore>,
        serve_dir: impl Into<PathBuf>,
        base_url: &str,
        auto_serve: bool,
        static_server: Arc<StaticServer>,
    ) -> Self {
        Self {
            store,
            serve_dir: serve_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auto_serve,
            static_server,
        }
    }

    pub fn serve_dir(&self) -> &Path {
        &self.serve_dir
    }

    /// Servable URL for a file in the serve root.
    pub fn servable_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }

    /// Human-readable success message for the status surface.
    pub fn success_message(url: &str) -> String {
        format!("success: model ready at {}", url)
    }

    pub async fn publish(
        &self,
        run_id: Uuid,
        artifacts: &[Artifact],
    ) -> Result<PublishedPointer, PublishError> {
        let primary = artifacts.first().ok_or(PublishError::NothingToPublish)?;
        let file_name = primary
            .local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PublishError::InvalidPath(primary.local_path.clone()))?;

        self.stage(&primary.local_path, &file_name).await?;

        let pointer = PublishedPointer {
            servable_url: self.servable_url(&file_name),
            published_at: Utc::now(),
            run_id: Some(run_id),
            job_id: Some(primary.job_id.clone()),
        };
        self.store.publish(&pointer).await?;
        if let Err(e) = self
            .store
            .set_status(&Self::success_message(&pointer.servable_url))
            .await
        {
            tracing::warn!(error = %e, "Failed to update status surface");
        }

        tracing::info!(
            run_id = %run_id,
            job_id = %primary.job_id,
            url = %pointer.servable_url,
            "Published model"
        );

        if self.auto_serve {
            if let Err(e) = self
                .static_server
                .ensure_running(&pointer.servable_url, &self.base_url, &self.serve_dir)
                .await
            {
                tracing::warn!(error = %e, "Could not start static artifact server");
            }
        }

        Ok(pointer)
    }

    /// Place `source` in the serve root as `file_name` via copy + rename, so
    /// the served file is never partially written.
    async fn stage(&self, source: &Path, file_name: &str) -> Result<(), PublishError> {
        let target = self.serve_dir.join(file_name);
        if same_file(source, &target).await {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.serve_dir).await?;
        let tmp = self
            .serve_dir
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        tokio::fs::copy(source, &tmp).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no artifacts to publish")]
    NothingToPublish,

    #[error("artifact path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("staging artifact failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
