//! Background orchestration of one image-to-3D run:
//! QUEUED → SUBMITTING → POLLING → DOWNLOADING → PUBLISHING → SUCCEEDED | FAILED.
//!
//! Each run is a detached tokio task with its own cancellation token (a
//! child of the orchestrator's shutdown token). Every failure is converted
//! into a terminal status surface message; nothing propagates to the caller
//! that triggered the run.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{AppConfig, ApiKey};
use crate::models::job::{Artifact, Job, RunStage, StatusRecord};
use crate::models::run::RunOutcome;
use crate::services::client::Model3dClient;
use crate::services::durations::{initial_delay, DurationCache};
use crate::services::fetcher::{ArtifactFetcher, FetchError};
use crate::services::poller::{PollError, PollSettings, StatusPoller};
use crate::services::publisher::{PublishError, ResultPublisher};
use crate::services::static_server::StaticServer;
use crate::services::store::{write_atomic, StateStore};
use crate::services::submitter::{JobSubmitter, SubmissionError};

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_SUBMITTING: &str = "submitting task";
pub const STATUS_POLLING: &str = "task submitted, waiting...";
pub const STATUS_DOWNLOADING: &str = "downloading artifacts";
pub const STATUS_PUBLISHING: &str = "publishing model";
pub const STATUS_CRASHED: &str = "background runner crashed";

/// Input for a single run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_path: PathBuf,
    pub api_key: ApiKey,
    pub prompt: Option<String>,
}

/// Handle to a spawned run. Dropping it does not stop the run.
pub struct RunHandle {
    pub run_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "Run supervisor failed");
                crashed_outcome(self.run_id)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("submission failed: {0}")]
    Submission(SubmissionError),

    #[error(transparent)]
    Poll(PollError),

    #[error(transparent)]
    Fetch(FetchError),

    #[error("publish failed: {0}")]
    Publish(PublishError),

    #[error("cancelled")]
    Cancelled { stage: RunStage },
}

impl RunError {
    /// Stage the run was in when it failed.
    pub fn stage(&self) -> RunStage {
        match self {
            RunError::Submission(_) => RunStage::Submitting,
            RunError::Poll(_) => RunStage::Polling,
            RunError::Fetch(_) => RunStage::Downloading,
            RunError::Publish(_) => RunStage::Publishing,
            RunError::Cancelled { stage } => *stage,
        }
    }
}

impl From<SubmissionError> for RunError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Cancelled => RunError::Cancelled {
                stage: RunStage::Submitting,
            },
            e => RunError::Submission(e),
        }
    }
}

impl From<PollError> for RunError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Cancelled => RunError::Cancelled {
                stage: RunStage::Polling,
            },
            e => RunError::Poll(e),
        }
    }
}

impl From<FetchError> for RunError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Cancelled => RunError::Cancelled {
                stage: RunStage::Downloading,
            },
            e => RunError::Fetch(e),
        }
    }
}

impl From<PublishError> for RunError {
    fn from(e: PublishError) -> Self {
        RunError::Publish(e)
    }
}

/// What a run accumulated before it ended.
#[derive(Default)]
struct RunProgress {
    job_id: Option<String>,
    artifacts: Vec<Artifact>,
    published_url: Option<String>,
}

struct Inner {
    config: Arc<AppConfig>,
    http: reqwest::Client,
    store: Arc<dyn StateStore>,
    fetcher: ArtifactFetcher,
    publisher: ResultPublisher,
    durations: Option<DurationCache>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn StateStore>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let static_server = Arc::new(StaticServer::new(http.clone()));
        let publisher = ResultPublisher::new(
            store.clone(),
            &config.artifacts_dir,
            &config.publish_base_url,
            config.auto_serve_artifacts,
            static_server,
        );
        let fetcher = ArtifactFetcher::new(http.clone(), &config.artifacts_dir);
        let durations = config.duration_cache_path.as_ref().map(DurationCache::new);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                store,
                fetcher,
                publisher,
                durations,
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Token cancelled by [`Orchestrator::shutdown`]; background helpers
    /// can hang off it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Write the queued status, spawn the run, and return immediately.
    pub async fn start_run(&self, request: RunRequest) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = self.inner.shutdown.child_token();

        {
            let mut active = lock_active(&self.inner.active);
            if self.inner.config.supersede_previous_runs {
                for (previous, token) in active.drain() {
                    tracing::info!(run_id = %previous, superseded_by = %run_id, "Cancelling superseded run");
                    token.cancel();
                }
            }
            active.insert(run_id, cancel.clone());
        }

        metrics::counter!("model3d_runs_started_total").increment(1);
        self.inner.set_status(STATUS_QUEUED).await;
        tracing::info!(run_id = %run_id, image = %request.image_path.display(), "Run queued");

        let inner = self.inner.clone();
        let token = cancel.clone();
        let span = tracing::info_span!("model3d_run", run_id = %run_id);
        let pipeline = tokio::spawn(
            {
                let inner = inner.clone();
                async move { inner.run_pipeline(run_id, request, token).await }
            }
            .instrument(span),
        );

        // Supervisor: a panic inside the pipeline still ends in a terminal
        // status and deregistration.
        let join = tokio::spawn(async move {
            let outcome = match pipeline.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Run crashed");
                    inner.set_status(STATUS_CRASHED).await;
                    crashed_outcome(run_id)
                }
            };
            lock_active(&inner.active).remove(&run_id);
            outcome
        });

        RunHandle {
            run_id,
            cancel,
            join,
        }
    }

    /// Cancel an in-flight run. Returns `false` if it is not running.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match lock_active(&self.inner.active).get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        lock_active(&self.inner.active).keys().copied().collect()
    }

    /// Cancel every run and background helper.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

fn lock_active(
    active: &Mutex<HashMap<Uuid, CancellationToken>>,
) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    // The map holds plain tokens; a panic elsewhere cannot leave it torn.
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn crashed_outcome(run_id: Uuid) -> RunOutcome {
    RunOutcome {
        run_id,
        stage: RunStage::Failed,
        job_id: None,
        published_url: None,
        artifacts: Vec::new(),
        message: STATUS_CRASHED.to_string(),
        failed_stage: None,
    }
}

impl Inner {
    /// Status writes are observability only; failures are logged, not fatal.
    async fn set_status(&self, text: &str) {
        if let Err(e) = self.store.set_status(text).await {
            tracing::warn!(status = text, error = %e, "Failed to update status surface");
        }
    }

    async fn enter(&self, stage: RunStage, text: &str) {
        tracing::info!(stage = %stage, "Run stage");
        self.set_status(text).await;
    }

    async fn run_pipeline(
        &self,
        run_id: Uuid,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let started = Instant::now();
        let mut progress = RunProgress::default();
        let result = self.execute(run_id, &request, &cancel, &mut progress).await;

        match result {
            Ok(message) => {
                metrics::counter!("model3d_runs_succeeded_total").increment(1);
                metrics::histogram!("model3d_run_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(job_id = progress.job_id.as_deref().unwrap_or("-"), "Run succeeded");
                RunOutcome {
                    run_id,
                    stage: RunStage::Succeeded,
                    job_id: progress.job_id,
                    published_url: progress.published_url,
                    artifacts: progress.artifacts,
                    message,
                    failed_stage: None,
                }
            }
            Err(e) => {
                let stage = e.stage();
                let message = e.to_string();
                metrics::counter!("model3d_runs_failed_total", "stage" => stage.to_string())
                    .increment(1);
                tracing::warn!(stage = %stage, error = %message, "Run failed");
                self.set_status(&message).await;
                RunOutcome {
                    run_id,
                    stage: RunStage::Failed,
                    job_id: progress.job_id,
                    published_url: None,
                    artifacts: progress.artifacts,
                    message,
                    failed_stage: Some(stage),
                }
            }
        }
    }

    /// Run every stage in order; returns the final status message.
    async fn execute(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        cancel: &CancellationToken,
        progress: &mut RunProgress,
    ) -> Result<String, RunError> {
        let config = &self.config;
        let client = Model3dClient::new(
            self.http.clone(),
            &config.model_api_base,
            request.api_key.clone(),
        );

        self.enter(RunStage::Submitting, STATUS_SUBMITTING).await;
        let prompt = request.prompt.as_deref().or(config.model_prompt.as_deref());
        let job = JobSubmitter::new(&client, config.debug_dir())
            .submit(run_id, &request.image_path, prompt, cancel)
            .await?;
        progress.job_id = Some(job.job_id.clone());

        self.enter(RunStage::Polling, STATUS_POLLING).await;
        let final_record = self.poll(run_id, &client, &job, cancel).await?;

        self.enter(RunStage::Downloading, STATUS_DOWNLOADING).await;
        progress.artifacts = self.fetcher.fetch(&final_record, cancel).await?;

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                stage: RunStage::Publishing,
            });
        }
        self.enter(RunStage::Publishing, STATUS_PUBLISHING).await;
        let pointer = self.publisher.publish(run_id, &progress.artifacts).await?;
        progress.published_url = Some(pointer.servable_url.clone());

        self.record_duration(&job).await;
        Ok(ResultPublisher::success_message(&pointer.servable_url))
    }

    async fn poll(
        &self,
        run_id: Uuid,
        client: &Model3dClient,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<StatusRecord, PollError> {
        let mut settings = PollSettings {
            interval: self.config.poll_interval(),
            max_attempts: self.config.max_poll_attempts,
            region_switch_after: self.config.region_switch_after,
            regions: self.config.poll_regions(),
            initial_delay: Duration::ZERO,
        };
        if let Some(durations) = &self.durations {
            if let Some(average) = durations.average().await {
                settings.initial_delay =
                    initial_delay(average, self.config.pacing_factor, settings.budget());
            }
        }

        let mut history = Vec::new();
        let result = StatusPoller::new(client, settings)
            .poll(job, cancel, &mut history)
            .await;
        self.write_poll_record(run_id, job, &history).await;
        result
    }

    async fn write_poll_record(&self, run_id: Uuid, job: &Job, history: &[StatusRecord]) {
        let record = serde_json::json!({
            "run_id": run_id,
            "job": job,
            "poll": history,
        });
        let path = self.config.debug_dir().join(format!("poll_{}.json", run_id));
        let written = match serde_json::to_vec_pretty(&record) {
            Ok(data) => write_atomic(&path, &data).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write poll debug record");
        }
    }

    async fn record_duration(&self, job: &Job) {
        let Some(durations) = &self.durations else {
            return;
        };
        let Ok(elapsed) = (Utc::now() - job.submitted_at).to_std() else {
            return;
        };
        if let Err(e) = durations.record(elapsed).await {
            tracing::warn!(error = %e, "Failed to record job duration");
        }
    }
}
