use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the submit CLI.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// API key for the image-to-3D job service
    #[serde(default, alias = "tripo_api_key", alias = "tripo_key")]
    pub model_api_key: Option<ApiKey>,

    /// Base URL of the job service (task submission and status endpoints)
    #[serde(default = "default_model_api_base")]
    pub model_api_base: String,

    /// Preferred region, sent as a `region` query parameter when set
    #[serde(default)]
    pub model_api_region: Option<String>,

    /// Regions to fall back to when status queries keep failing
    #[serde(default)]
    pub model_api_alternate_regions: Vec<String>,

    /// Free-text instructions sent alongside the image
    #[serde(default)]
    pub model_prompt: Option<String>,

    /// Root for downloaded artifacts; also the static serve root
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Status text, published pointer and debug records live here
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Prefix under which published artifacts are served
    #[serde(default = "default_publish_base_url")]
    pub publish_base_url: String,

    /// Start a static file server on `publish_base_url` if none answers
    #[serde(default = "default_true")]
    pub auto_serve_artifacts: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Consecutive failed status queries before rotating to the next region
    #[serde(default = "default_region_switch_after")]
    pub region_switch_after: u32,

    /// JSON file of historical job durations used for adaptive pacing
    #[serde(default)]
    pub duration_cache_path: Option<PathBuf>,

    /// Fraction of the average job duration to wait before polling
    #[serde(default = "default_pacing_factor")]
    pub pacing_factor: f64,

    /// Cancel in-flight runs when a new one is triggered
    #[serde(default)]
    pub supersede_previous_runs: bool,

    /// Watch the serve root and publish newly finished model files
    #[serde(default)]
    pub finalize_watcher_enabled: bool,

    #[serde(default = "default_finalize_stable_secs")]
    pub finalize_stable_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Secret string that never shows up in `Debug` output or logs.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_model_api_base() -> String {
    "https://api.tripo3d.ai/v2/openapi".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_publish_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_poll_attempts() -> u32 {
    240
}

fn default_region_switch_after() -> u32 {
    3
}

fn default_pacing_factor() -> f64 {
    0.7
}

fn default_finalize_stable_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Configuration with every default applied and the given API key.
    pub fn with_defaults(model_api_key: Option<ApiKey>) -> Self {
        Self {
            bind_addr: default_bind_addr(),
            model_api_key,
            model_api_base: default_model_api_base(),
            model_api_region: None,
            model_api_alternate_regions: Vec::new(),
            model_prompt: None,
            artifacts_dir: default_artifacts_dir(),
            state_dir: default_state_dir(),
            publish_base_url: default_publish_base_url(),
            auto_serve_artifacts: true,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            region_switch_after: default_region_switch_after(),
            duration_cache_path: None,
            pacing_factor: default_pacing_factor(),
            supersede_previous_runs: false,
            finalize_watcher_enabled: false,
            finalize_stable_secs: default_finalize_stable_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Primary region first, then the alternates, without duplicates.
    /// A single `None` entry means "no region parameter".
    pub fn poll_regions(&self) -> Vec<Option<String>> {
        let mut regions = vec![self.model_api_region.clone()];
        for region in &self.model_api_alternate_regions {
            let candidate = Some(region.trim().to_string());
            if !region.trim().is_empty() && !regions.contains(&candidate) {
                regions.push(candidate);
            }
        }
        regions
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.state_dir.join("debug")
    }
}
