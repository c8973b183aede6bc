//! Shared setup for integration tests: a mock job service, a scratch
//! directory and an application state wired to both.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use model3d_watcher::app_state::AppState;
use model3d_watcher::config::{ApiKey, AppConfig};
use model3d_watcher::models::job::PublishedPointer;
use model3d_watcher::models::run::TriggerRequest;
use model3d_watcher::services::store::StateStore;

use crate::fixtures;

pub const PUBLISH_BASE: &str = "http://127.0.0.1:8000";

pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
    pub config: AppConfig,
}

impl TestEnv {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().expect("tempdir");

        let mut config = AppConfig::with_defaults(Some(ApiKey::new("test-key")));
        config.model_api_base = server.uri();
        config.artifacts_dir = dir.path().join("artifacts");
        config.state_dir = dir.path().join("state");
        config.publish_base_url = PUBLISH_BASE.to_string();
        config.auto_serve_artifacts = false;
        config.poll_interval_ms = 0;
        config.request_timeout_secs = 10;

        Self {
            server,
            dir,
            config,
        }
    }

    pub fn state(&self) -> AppState {
        AppState::from_config(self.config.clone()).expect("state")
    }

    pub fn write_image(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("write image");
        path
    }

    /// Download URL served by the mock for `name`.
    pub fn file_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.server.uri(), name)
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.config.artifacts_dir
    }
}

pub fn trigger_request(image_path: &Path) -> TriggerRequest {
    TriggerRequest {
        image_path: image_path.display().to_string(),
        enabled: true,
        api_key: None,
        prompt: None,
    }
}

/// Every submission is accepted with `job_id`.
pub async fn mount_submit(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::submit_response(job_id)))
        .mount(server)
        .await;
}

/// Status queries for `job_id` always answer with `body`.
pub async fn mount_status(server: &MockServer, job_id: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/task/{}", job_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_download(server: &MockServer, name: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

pub async fn seed_pointer(state: &AppState, url: &str) -> PublishedPointer {
    let pointer = PublishedPointer {
        servable_url: url.to_string(),
        published_at: chrono::Utc::now(),
        run_id: None,
        job_id: Some("previous".to_string()),
    };
    state.store.publish(&pointer).await.expect("seed pointer");
    pointer
}

pub async fn current_status(store: &dyn StateStore) -> String {
    store.status().await.expect("status").unwrap_or_default()
}

/// Wait until the status surface satisfies `predicate`.
pub async fn wait_for_status<F>(store: &dyn StateStore, predicate: F, timeout: Duration) -> String
where
    F: Fn(&str) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = current_status(store).await;
        if predicate(&status) {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("status never matched, last value: {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
