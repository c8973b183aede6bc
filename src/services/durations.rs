//! Historical job durations for adaptive poll pacing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::services::store::{write_atomic, StoreError};

const MAX_SAMPLES: usize = 20;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DurationSamples {
    seconds: Vec<f64>,
}

/// JSON-file cache of the most recent successful job durations.
pub struct DurationCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DurationCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Average of the recorded durations, `None` without history.
    /// An unreadable cache is treated as empty.
    pub async fn average(&self) -> Option<Duration> {
        let samples = self.load().await;
        if samples.seconds.is_empty() {
            return None;
        }
        let mean = samples.seconds.iter().sum::<f64>() / samples.seconds.len() as f64;
        Duration::try_from_secs_f64(mean).ok()
    }

    pub async fn record(&self, duration: Duration) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut samples = self.load().await;
        samples.seconds.push(duration.as_secs_f64());
        if samples.seconds.len() > MAX_SAMPLES {
            let excess = samples.seconds.len() - MAX_SAMPLES;
            samples.seconds.drain(..excess);
        }
        let data = serde_json::to_vec_pretty(&samples)?;
        write_atomic(&self.path, &data).await
    }

    /// Samples that cannot be a job duration (negative, non-finite or
    /// beyond `Duration`'s range) are dropped.
    async fn load(&self) -> DurationSamples {
        let mut samples = match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable duration cache");
                DurationSamples::default()
            }),
            Err(_) => DurationSamples::default(),
        };
        let before = samples.seconds.len();
        samples
            .seconds
            .retain(|s| Duration::try_from_secs_f64(*s).is_ok());
        if samples.seconds.len() != before {
            tracing::warn!(
                path = %self.path.display(),
                dropped = before - samples.seconds.len(),
                "Ignoring invalid duration samples"
            );
        }
        samples
    }
}

/// Delay before frequent polling starts: a fraction of the historical
/// average, never more than half of the whole attempt budget.
pub fn initial_delay(average: Duration, factor: f64, budget: Duration) -> Duration {
    if !factor.is_finite() || factor <= 0.0 {
        return Duration::ZERO;
    }
    let cap = budget / 2;
    Duration::try_from_secs_f64(average.as_secs_f64() * factor)
        .map_or(cap, |delay| delay.min(cap))
}
