use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Normalized status of a remote image-to-3D job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Timeout)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Unknown => 0,
            JobStatus::Pending => 1,
            JobStatus::Running => 2,
            JobStatus::Success | JobStatus::Failed | JobStatus::Timeout => 3,
        }
    }

    /// Fold a new observation into the tracked status. Status only moves
    /// forward: terminal states stick and lower-ranked observations are ignored.
    pub fn advance(self, observed: JobStatus) -> JobStatus {
        if self.is_terminal() || observed.rank() < self.rank() {
            self
        } else {
            observed
        }
    }
}

/// A submitted remote job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub source_image_path: PathBuf,
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// One entry of a job's poll history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub raw_status: Option<String>,
    pub normalized_status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
    /// Set when the query itself failed (transport, HTTP status or parse).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// A result file downloaded from a successful job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub job_id: String,
    pub remote_url: String,
    pub local_path: PathBuf,
    pub byte_size: u64,
}

/// The single "latest result" location read by the viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishedPointer {
    pub servable_url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl PublishedPointer {
    /// File name component of the servable URL.
    pub fn file_name(&self) -> Option<&str> {
        let path = self.servable_url.split(['?', '#']).next()?;
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }
}

/// Per-run pipeline state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStage {
    Queued,
    Submitting,
    Polling,
    Downloading,
    Publishing,
    Succeeded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_never_moves_backwards() {
        let status = JobStatus::Running;
        assert_eq!(status.advance(JobStatus::Pending), JobStatus::Running);
        assert_eq!(status.advance(JobStatus::Unknown), JobStatus::Running);
        assert_eq!(status.advance(JobStatus::Success), JobStatus::Success);
        assert_eq!(JobStatus::Success.advance(JobStatus::Pending), JobStatus::Success);
        assert_eq!(JobStatus::Success.advance(JobStatus::Failed), JobStatus::Success);
    }

    #[test]
    fn test_unknown_can_advance() {
        assert_eq!(JobStatus::Unknown.advance(JobStatus::Pending), JobStatus::Pending);
        assert_eq!(JobStatus::Unknown.advance(JobStatus::Unknown), JobStatus::Unknown);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Success.to_string(), "SUCCESS");
        assert_eq!("RUNNING".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!(RunStage::Downloading.to_string(), "downloading");
    }

    #[test]
    fn test_pointer_file_name() {
        let pointer = PublishedPointer {
            servable_url: "http://127.0.0.1:8000/out.glb".to_string(),
            published_at: Utc::now(),
            run_id: None,
            job_id: None,
        };
        assert_eq!(pointer.file_name(), Some("out.glb"));
    }
}
