//! Job submission: turns a local image into a remote job id.
//!
//! Candidate strategies are tried in order until one yields a 2xx response
//! with a job id: the structured JSON client first, then raw multipart
//! forms covering the field names and task-descriptor shapes seen in the
//! wild.

use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::Job;
use crate::services::client::{ImageToModelRequest, Model3dClient, RawResponse};
use crate::services::lookup;
use crate::services::store::write_atomic;

const TASK_TYPE: &str = "image_to_model";

/// Keys under which services return the new job's id.
pub const JOB_ID_KEYS: &[&str] = &["task_id", "id", "job_id", "JobId", "JobID"];

const FILE_KEYS: &[&str] = &["image", "file", "image_file", "upload"];

/// How the task descriptor is laid out next to the file part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormShape {
    /// `type=image_to_model`, `prompt=...`
    Type,
    /// `task_type=image_to_model`, `prompt=...`
    TaskType,
    /// `type=image_to_model`, `inputs={"prompt": ...}`
    TypeWithInputs,
    /// `payload={"type": "image_to_model", "prompt": ...}`
    Payload,
}

const FORM_SHAPES: &[FormShape] = &[
    FormShape::Type,
    FormShape::TaskType,
    FormShape::TypeWithInputs,
    FormShape::Payload,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStrategy {
    Structured,
    Multipart {
        file_key: &'static str,
        shape: FormShape,
    },
}

impl fmt::Display for SubmitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitStrategy::Structured => f.write_str("structured"),
            SubmitStrategy::Multipart { file_key, shape } => {
                write!(f, "multipart[{}:{:?}]", file_key, shape)
            }
        }
    }
}

/// All strategies in the order they are attempted.
pub fn candidate_strategies() -> Vec<SubmitStrategy> {
    let mut strategies = vec![SubmitStrategy::Structured];
    for file_key in FILE_KEYS {
        for shape in FORM_SHAPES {
            strategies.push(SubmitStrategy::Multipart {
                file_key,
                shape: *shape,
            });
        }
    }
    strategies
}

/// Image bytes plus what was sniffed about them.
struct UploadImage {
    bytes: Vec<u8>,
    file_name: String,
    format: String,
    mime: String,
}

impl UploadImage {
    async fn read(path: &Path) -> Result<Self, SubmissionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| SubmissionError::Image {
                path: path.to_path_buf(),
                source,
            })?;

        // Sniffed for labelling only; the service decides what it accepts.
        let (format, mime) = match image::guess_format(&bytes) {
            Ok(format) => (
                format
                    .extensions_str()
                    .first()
                    .copied()
                    .unwrap_or("png")
                    .to_string(),
                format.to_mime_type().to_string(),
            ),
            Err(_) => ("png".to_string(), "image/png".to_string()),
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image.{}", format));

        Ok(Self {
            bytes,
            file_name,
            format,
            mime,
        })
    }
}

/// One attempted request, persisted in the debug record.
#[derive(Debug, Serialize)]
struct AttemptRecord {
    strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitDebugRecord<'a> {
    run_id: Uuid,
    image: &'a Path,
    base_url: &'a str,
    attempts: &'a [AttemptRecord],
    job_id: Option<&'a str>,
}

pub struct JobSubmitter<'a> {
    client: &'a Model3dClient,
    debug_dir: PathBuf,
    strategies: Vec<SubmitStrategy>,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(client: &'a Model3dClient, debug_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            debug_dir: debug_dir.into(),
            strategies: candidate_strategies(),
        }
    }

    /// Restrict or reorder the strategies to try.
    pub fn with_strategies(mut self, strategies: Vec<SubmitStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub async fn submit(
        &self,
        run_id: Uuid,
        image_path: &Path,
        prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Job, SubmissionError> {
        let image = UploadImage::read(image_path).await?;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_failure = String::from("no submission strategy attempted");
        let mut job_id = None;

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.attempt(*strategy, &image, prompt) => result,
            };

            match result {
                Ok(raw) => {
                    let found = raw
                        .is_success()
                        .then(|| raw.json().ok())
                        .flatten()
                        .and_then(|body| lookup::find_string(&body, JOB_ID_KEYS));

                    tracing::debug!(
                        run_id = %run_id,
                        strategy = %strategy,
                        status = raw.status,
                        accepted = found.is_some(),
                        "Submission attempt finished"
                    );

                    if found.is_none() {
                        last_failure = if raw.is_success() {
                            format!("response carried no job id: {}", raw.summary())
                        } else {
                            raw.summary()
                        };
                    }
                    attempts.push(AttemptRecord {
                        strategy: strategy.to_string(),
                        status: Some(raw.status),
                        body: Some(raw.body),
                        error: None,
                    });

                    if found.is_some() {
                        job_id = found;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(run_id = %run_id, strategy = %strategy, error = %e, "Submission attempt failed");
                    last_failure = e.to_string();
                    attempts.push(AttemptRecord {
                        strategy: strategy.to_string(),
                        status: None,
                        body: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.write_debug_record(run_id, image_path, &attempts, job_id.as_deref())
            .await;

        match job_id {
            Some(job_id) => {
                tracing::info!(run_id = %run_id, job_id = %job_id, attempts = attempts.len(), "Job submitted");
                Ok(Job {
                    source_image_path: image_path.to_path_buf(),
                    job_id,
                    submitted_at: Utc::now(),
                })
            }
            None if cancel.is_cancelled() => Err(SubmissionError::Cancelled),
            None => Err(SubmissionError::Rejected {
                attempts: attempts.len(),
                last_response: last_failure,
            }),
        }
    }

    async fn attempt(
        &self,
        strategy: SubmitStrategy,
        image: &UploadImage,
        prompt: Option<&str>,
    ) -> Result<RawResponse, reqwest::Error> {
        match strategy {
            SubmitStrategy::Structured => {
                let request = ImageToModelRequest::new(
                    &image.bytes,
                    &image.format,
                    prompt.map(str::to_string),
                );
                self.client.submit_json(&request).await
            }
            SubmitStrategy::Multipart { file_key, shape } => {
                let form = build_form(file_key, shape, image, prompt)?;
                self.client.submit_multipart(form).await
            }
        }
    }

    async fn write_debug_record(
        &self,
        run_id: Uuid,
        image_path: &Path,
        attempts: &[AttemptRecord],
        job_id: Option<&str>,
    ) {
        let record = SubmitDebugRecord {
            run_id,
            image: image_path,
            base_url: self.client.base_url(),
            attempts,
            job_id,
        };
        let path = self.debug_dir.join(format!("submit_{}.json", run_id));
        let written = match serde_json::to_vec_pretty(&record) {
            Ok(data) => write_atomic(&path, &data).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write submission debug record");
        }
    }
}

fn build_form(
    file_key: &'static str,
    shape: FormShape,
    image: &UploadImage,
    prompt: Option<&str>,
) -> Result<Form, reqwest::Error> {
    let part = Part::bytes(image.bytes.clone())
        .file_name(image.file_name.clone())
        .mime_str(&image.mime)?;
    let form = Form::new().part(file_key, part);

    let form = match shape {
        FormShape::Type => with_prompt(form.text("type", TASK_TYPE), prompt),
        FormShape::TaskType => with_prompt(form.text("task_type", TASK_TYPE), prompt),
        FormShape::TypeWithInputs => {
            let inputs = serde_json::json!({ "prompt": prompt });
            form.text("type", TASK_TYPE)
                .text("inputs", inputs.to_string())
        }
        FormShape::Payload => {
            let payload = serde_json::json!({ "type": TASK_TYPE, "prompt": prompt });
            form.text("payload", payload.to_string())
        }
    };
    Ok(form)
}

fn with_prompt(form: Form, prompt: Option<&str>) -> Form {
    match prompt {
        Some(prompt) => form.text("prompt", prompt.to_string()),
        None => form,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("cannot read image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{last_response} (after {attempts} attempts)")]
    Rejected {
        attempts: usize,
        /// Last raw response or transport error, for diagnosis.
        last_response: String,
    },

    #[error("submission cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_strategy_comes_first() {
        let strategies = candidate_strategies();
        assert_eq!(strategies[0], SubmitStrategy::Structured);
        assert_eq!(strategies.len(), 1 + FILE_KEYS.len() * FORM_SHAPES.len());
        assert_eq!(
            strategies[1],
            SubmitStrategy::Multipart {
                file_key: "image",
                shape: FormShape::Type
            }
        );
    }

    #[test]
    fn test_strategy_display() {
        let strategy = SubmitStrategy::Multipart {
            file_key: "upload",
            shape: FormShape::Payload,
        };
        assert_eq!(strategy.to_string(), "multipart[upload:Payload]");
    }

    #[tokio::test]
    async fn test_missing_image_is_an_error() {
        let err = UploadImage::read(Path::new("/definitely/not/here.png"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SubmissionError::Image { .. }));
    }

    #[tokio::test]
    async fn test_unknown_bytes_fall_back_to_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.png");
        std::fs::write(&path, b"not really an image").unwrap();

        let image = UploadImage::read(&path).await.unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.format, "png");
        assert_eq!(image.file_name, "room.png");
    }
}
