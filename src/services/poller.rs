//! Status polling for submitted jobs.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobStatus, StatusRecord};
use crate::services::client::{ClientError, Model3dClient};
use crate::services::lookup;

/// Keys under which services report a job's status.
pub const STATUS_KEYS: &[&str] = &["status", "Status", "JobStatus", "State", "state"];

const SUCCESS_WORDS: &[&str] = &["SUCCESS", "SUCCEED", "SUCCEEDED", "DONE", "COMPLETED"];
const FAILED_WORDS: &[&str] = &["FAILED", "ERROR"];
const PENDING_WORDS: &[&str] = &["QUEUED", "PENDING", "WAIT", "WAITING", "INIT", "SUBMITTED"];
const RUNNING_WORDS: &[&str] = &["RUNNING", "PROCESSING", "IN_PROGRESS", "RUN"];

/// Map one raw status string onto the normalized vocabulary.
pub fn normalize_status_str(raw: &str) -> JobStatus {
    let folded = raw.trim().to_uppercase();
    let folded = folded.as_str();
    if SUCCESS_WORDS.contains(&folded) {
        JobStatus::Success
    } else if FAILED_WORDS.contains(&folded) {
        JobStatus::Failed
    } else if PENDING_WORDS.contains(&folded) {
        JobStatus::Pending
    } else if RUNNING_WORDS.contains(&folded) {
        JobStatus::Running
    } else {
        JobStatus::Unknown
    }
}

/// Locate and normalize the status of a raw query payload.
/// Returns the raw status string (if any) alongside the normalized value.
pub fn normalize_status(payload: &Value) -> (Option<String>, JobStatus) {
    match lookup::find_string(payload, STATUS_KEYS) {
        Some(raw) => {
            let status = normalize_status_str(&raw);
            (Some(raw), status)
        }
        None => (None, JobStatus::Unknown),
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Consecutive failed queries before moving to the next region.
    pub region_switch_after: u32,
    /// Primary region first; `None` sends no region parameter.
    pub regions: Vec<Option<String>>,
    /// Wait before the first query (adaptive pacing).
    pub initial_delay: Duration,
}

impl PollSettings {
    /// Total wall time the attempt budget allows for.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// A single failed status query. Recorded in the poll history; never aborts
/// the loop.
#[derive(Debug, thiserror::Error)]
#[error("status query {attempt} failed: {source}")]
pub struct PollTransientError {
    pub attempt: u32,
    #[source]
    pub source: ClientError,
}

pub struct StatusPoller<'a> {
    client: &'a Model3dClient,
    settings: PollSettings,
}

impl<'a> StatusPoller<'a> {
    pub fn new(client: &'a Model3dClient, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    /// Poll until a terminal status, the attempt budget, or cancellation.
    /// Every observation is appended to `history`.
    pub async fn poll(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        history: &mut Vec<StatusRecord>,
    ) -> Result<StatusRecord, PollError> {
        let regions: &[Option<String>] = if self.settings.regions.is_empty() {
            &[None]
        } else {
            &self.settings.regions
        };
        let mut region_index = 0;
        let mut consecutive_errors = 0;
        let mut tracked = JobStatus::Unknown;

        if !self.settings.initial_delay.is_zero() {
            tracing::info!(
                job_id = %job.job_id,
                delay_secs = self.settings.initial_delay.as_secs_f64(),
                "Waiting before polling based on historical durations"
            );
            sleep_or_cancel(self.settings.initial_delay, cancel).await?;
        }

        for attempt in 1..=self.settings.max_attempts {
            if attempt > 1 {
                sleep_or_cancel(self.settings.interval, cancel).await?;
            }

            let region = regions[region_index].as_deref();
            metrics::counter!("model3d_poll_attempts_total").increment(1);

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                result = self.client.query_task(&job.job_id, region) => result,
            };

            match result {
                Ok(payload) => {
                    consecutive_errors = 0;
                    let (raw_status, observed) = normalize_status(&payload);
                    if observed == JobStatus::Unknown {
                        tracing::warn!(
                            job_id = %job.job_id,
                            attempt,
                            raw_status = raw_status.as_deref().unwrap_or("<missing>"),
                            "Unrecognized job status, continuing"
                        );
                    }
                    tracked = tracked.advance(observed);

                    let record = StatusRecord {
                        job_id: job.job_id.clone(),
                        raw_status,
                        normalized_status: tracked,
                        timestamp: Utc::now(),
                        raw_payload: payload,
                        error: None,
                        region: region.map(str::to_string),
                    };
                    history.push(record.clone());

                    tracing::debug!(job_id = %job.job_id, attempt, status = %tracked, "Polled job status");

                    match tracked {
                        JobStatus::Success => return Ok(record),
                        JobStatus::Failed => {
                            return Err(PollError::RemoteJobFailed {
                                job_id: job.job_id.clone(),
                                status: record.raw_status.unwrap_or_else(|| tracked.to_string()),
                            })
                        }
                        _ => {}
                    }
                }
                Err(source) => {
                    let error = PollTransientError { attempt, source };
                    tracing::warn!(job_id = %job.job_id, region = region.unwrap_or("-"), error = %error, "Status query failed");
                    history.push(StatusRecord {
                        job_id: job.job_id.clone(),
                        raw_status: None,
                        normalized_status: tracked,
                        timestamp: Utc::now(),
                        raw_payload: Value::Null,
                        error: Some(error.to_string()),
                        region: region.map(str::to_string),
                    });

                    consecutive_errors += 1;
                    if regions.len() > 1
                        && self.settings.region_switch_after > 0
                        && consecutive_errors >= self.settings.region_switch_after
                    {
                        region_index = (region_index + 1) % regions.len();
                        consecutive_errors = 0;
                        tracing::info!(
                            job_id = %job.job_id,
                            region = regions[region_index].as_deref().unwrap_or("-"),
                            "Switching status query region after repeated failures"
                        );
                    }
                }
            }
        }

        history.push(StatusRecord {
            job_id: job.job_id.clone(),
            raw_status: None,
            normalized_status: JobStatus::Timeout,
            timestamp: Utc::now(),
            raw_payload: Value::Null,
            error: None,
            region: None,
        });
        Err(PollError::Timeout {
            job_id: job.job_id.clone(),
            attempts: self.settings.max_attempts,
        })
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), PollError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("timeout waiting for task")]
    Timeout { job_id: String, attempts: u32 },

    #[error("task failed: {status}")]
    RemoteJobFailed { job_id: String, status: String },

    #[error("polling cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_vocabulary_any_case() {
        for raw in ["SUCCESS", "done", "Completed", "succeeded", " success "] {
            assert_eq!(normalize_status_str(raw), JobStatus::Success, "{raw}");
        }
    }

    #[test]
    fn test_failed_vocabulary() {
        for raw in ["FAILED", "error", "Failed"] {
            assert_eq!(normalize_status_str(raw), JobStatus::Failed, "{raw}");
        }
    }

    #[test]
    fn test_other_values_keep_polling() {
        assert_eq!(normalize_status_str("running"), JobStatus::Running);
        assert_eq!(normalize_status_str("queued"), JobStatus::Pending);
        assert_eq!(normalize_status_str("banana"), JobStatus::Unknown);
        assert_eq!(normalize_status_str(""), JobStatus::Unknown);
        assert!(!normalize_status_str("cancelled").is_terminal());
    }

    #[test]
    fn test_status_found_under_wrappers() {
        let tencent = json!({"Response": {"Status": "DONE", "RequestId": "r"}});
        assert_eq!(
            normalize_status(&tencent),
            (Some("DONE".to_string()), JobStatus::Success)
        );

        let tripo = json!({"code": 0, "data": {"task_id": "t", "status": "running"}});
        assert_eq!(normalize_status(&tripo).1, JobStatus::Running);

        assert_eq!(normalize_status(&json!({"foo": 1})), (None, JobStatus::Unknown));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let payload = json!({"data": {"JobStatus": "Succeeded"}});
        let first = normalize_status(&payload);
        let second = normalize_status(&payload);
        assert_eq!(first, second);
    }

    #[test]
    fn test_budget() {
        let settings = PollSettings {
            interval: Duration::from_secs(5),
            max_attempts: 240,
            region_switch_after: 3,
            regions: vec![None],
            initial_delay: Duration::ZERO,
        };
        assert_eq!(settings.budget(), Duration::from_secs(20 * 60));
    }
}
