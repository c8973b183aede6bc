use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Artifact, RunStage};

/// Request to start a background 3D generation run.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TriggerRequest {
    /// Local image to submit.
    #[garde(length(min = 1, max = 4096))]
    pub image_path: String,

    /// Mirrors the UI's "enable 3D generation" toggle.
    #[serde(default = "default_enabled")]
    #[garde(skip)]
    pub enabled: bool,

    /// Overrides the configured API key for this run only.
    #[serde(default)]
    #[garde(length(min = 1, max = 512))]
    pub api_key: Option<String>,

    /// Overrides the configured prompt for this run only.
    #[serde(default)]
    #[garde(length(max = 2000))]
    pub prompt: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Response after a trigger request.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerResponse {
    Started { run_id: Uuid },
    Disabled,
    MissingCredentials,
}

/// Read-only view returned by the status query.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub status: String,
    /// Local staged model file when present, otherwise the published URL.
    pub model: Option<String>,
}

/// Final result of one background run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub stage: RunStage,
    pub job_id: Option<String>,
    pub published_url: Option<String>,
    pub artifacts: Vec<Artifact>,
    /// Terminal status surface text.
    pub message: String,
    /// Stage in which the run failed, if it failed.
    pub failed_stage: Option<RunStage>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.stage == RunStage::Succeeded
    }
}
