use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ApiKey, AppConfig};
use crate::models::run::{StatusView, TriggerRequest};
use crate::services::orchestrator::{Orchestrator, RunHandle, RunRequest};
use crate::services::store::{FileStateStore, StateStore, StoreError};

pub const STATUS_IDLE: &str = "idle";

/// Why a trigger did not start a run. The display text is what the status
/// surface shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TriggerRejected {
    #[error("disabled by user")]
    Disabled,

    #[error("no API key configured")]
    MissingCredentials,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn StateStore>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn StateStore>) -> Result<Self, reqwest::Error> {
        let config = Arc::new(config);
        let orchestrator = Orchestrator::new(config.clone(), store.clone())?;
        Ok(Self {
            config,
            store,
            orchestrator,
        })
    }

    /// State backed by files in the configured state directory.
    pub fn from_config(config: AppConfig) -> Result<Self, reqwest::Error> {
        let store = Arc::new(FileStateStore::new(&config.state_dir));
        Self::new(config, store)
    }

    /// Start a background run and return without waiting for it.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<RunHandle, TriggerRejected> {
        if !request.enabled {
            return Err(self.reject(TriggerRejected::Disabled).await);
        }
        let api_key = request
            .api_key
            .filter(|key| !key.trim().is_empty())
            .map(ApiKey::new)
            .or_else(|| self.config.model_api_key.clone())
            .filter(|key| !key.expose().trim().is_empty());
        let Some(api_key) = api_key else {
            return Err(self.reject(TriggerRejected::MissingCredentials).await);
        };

        Ok(self
            .orchestrator
            .start_run(RunRequest {
                image_path: PathBuf::from(request.image_path),
                api_key,
                prompt: request.prompt,
            })
            .await)
    }

    async fn reject(&self, reason: TriggerRejected) -> TriggerRejected {
        tracing::info!(reason = %reason, "Run not started");
        if let Err(e) = self.store.set_status(&reason.to_string()).await {
            tracing::warn!(error = %e, "Failed to update status surface");
        }
        reason
    }

    /// Current status text and the model to display.
    pub async fn status_view(&self) -> Result<StatusView, StoreError> {
        let status = self
            .store
            .status()
            .await?
            .unwrap_or_else(|| STATUS_IDLE.to_string());

        let model = match self.store.pointer().await? {
            Some(pointer) => {
                let local = pointer
                    .file_name()
                    .map(|name| self.config.artifacts_dir.join(name));
                let staged = match &local {
                    Some(path) => tokio::fs::metadata(path)
                        .await
                        .map(|meta| meta.is_file())
                        .unwrap_or(false),
                    None => false,
                };
                match local {
                    Some(path) if staged => Some(path.display().to_string()),
                    _ => Some(pointer.servable_url),
                }
            }
            None => None,
        };

        Ok(StatusView { status, model })
    }

    pub fn cancel(&self, run_id: Uuid) -> bool {
        self.orchestrator.cancel(run_id)
    }
}
