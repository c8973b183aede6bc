//! Artifact discovery and download for successful jobs.

use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{Artifact, StatusRecord};
use crate::services::lookup;

/// Keys under which a list of file descriptors may appear.
pub const FILE_LIST_KEYS: &[&str] = &["files", "ResultFile3Ds", "result_files", "outputs"];

/// Keys a descriptor may use for its download URL.
pub const URL_KEYS: &[&str] = &["url", "Url", "URL", "download_url", "uri"];

const PREVIEW_KEYS: &[&str] = &["PreviewImageUrl", "preview_url"];

/// Used when no descriptor list exists: an `output` object mapping
/// artifact kinds to URLs.
const OUTPUT_URL_KEYS: &[&str] = &["model", "pbr_model", "base_model", "rendered_image"];

/// Collect every download URL referenced by a status payload, models
/// before previews, deduplicated in first-seen order.
pub fn locate_file_urls(payload: &Value) -> Vec<String> {
    let descriptors = match payload {
        Value::Array(items) if items.iter().any(is_descriptor) => Some(items),
        _ => lookup::find_key_where(payload, FILE_LIST_KEYS, |v| {
            v.as_array().is_some_and(|items| !items.is_empty())
        })
        .and_then(Value::as_array),
    };

    let mut urls = Vec::new();
    if let Some(items) = descriptors {
        let mut previews = Vec::new();
        for item in items {
            match item {
                Value::String(url) if looks_like_url(url) => urls.push(url.clone()),
                Value::Object(_) => {
                    urls.extend(lookup::get_string(item, URL_KEYS));
                    previews.extend(lookup::get_string(item, PREVIEW_KEYS));
                }
                _ => {}
            }
        }
        urls.extend(previews);
    }

    if urls.is_empty() {
        if let Some(output) = lookup::find_key_where(payload, &["output"], Value::is_object) {
            urls.extend(
                OUTPUT_URL_KEYS
                    .iter()
                    .filter_map(|key| lookup::get_string(output, &[key]))
                    .filter(|url| looks_like_url(url)),
            );
        }
    }

    let mut seen = HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    urls
}

fn is_descriptor(value: &Value) -> bool {
    lookup::get_string(value, URL_KEYS).is_some()
}

fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// File name for a downloaded URL: its last path segment, sanitized, or
/// `<job_id>_<index>.glb` when the URL has none.
pub fn file_name_from_url(url: &str, job_id: &str, index: usize) -> String {
    let segment = url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|segments| segments.last().map(str::to_string))
        })
        .unwrap_or_default();

    let name = sanitize(&segment);
    if name.is_empty() || name.chars().all(|c| c == '.') {
        format!("{}_{}.glb", sanitize(job_id), index)
    } else {
        name
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `name` or, if already taken, `stem_N.ext` with the first free N.
fn unique_name(name: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (name.clone(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// A single failed download. Siblings are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download of {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("writing {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ArtifactFetcher {
    http: reqwest::Client,
    artifacts_dir: PathBuf,
}

impl ArtifactFetcher {
    pub fn new(http: reqwest::Client, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Output directory for a job's files.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.artifacts_dir.join(sanitize(job_id))
    }

    /// Download every file referenced by a successful status record.
    pub async fn fetch(
        &self,
        record: &StatusRecord,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>, FetchError> {
        let urls = locate_file_urls(&record.raw_payload);
        if urls.is_empty() {
            return Err(FetchError::NoArtifacts {
                job_id: record.job_id.clone(),
                failed_downloads: 0,
            });
        }

        let dir = self.job_dir(&record.job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut taken = HashSet::new();
        let mut artifacts = Vec::new();
        let mut failures = 0;

        for (index, url) in urls.iter().enumerate() {
            let name = unique_name(file_name_from_url(url, &record.job_id, index), &mut taken);
            let path = dir.join(&name);

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.download(url, &path) => result,
            };

            match result {
                Ok(byte_size) => {
                    tracing::info!(job_id = %record.job_id, url = %url, path = %path.display(), byte_size, "Downloaded artifact");
                    artifacts.push(Artifact {
                        job_id: record.job_id.clone(),
                        remote_url: url.clone(),
                        local_path: path,
                        byte_size,
                    });
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id = %record.job_id, error = %e, "Artifact download failed");
                }
            }
        }

        if artifacts.is_empty() {
            return Err(FetchError::NoArtifacts {
                job_id: record.job_id.clone(),
                failed_downloads: failures,
            });
        }
        Ok(artifacts)
    }

    /// Stream the body into a hidden `.part` file next to `path`, then
    /// rename it into place. A failed download leaves nothing behind.
    async fn download(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| DownloadError::Http {
                url: url.to_string(),
                source,
            })?;

        let partial = partial_path(path);
        let result = stream_to_file(url, response, &partial).await;
        let result = match result {
            Ok(written) => tokio::fs::rename(&partial, path)
                .await
                .map(|_| written)
                .map_err(|source| DownloadError::Write {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
}

async fn stream_to_file(
    url: &str,
    mut response: reqwest::Response,
    partial: &Path,
) -> Result<u64, DownloadError> {
    let write_error = |source| DownloadError::Write {
        path: partial.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::File::create(partial).await.map_err(write_error)?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| DownloadError::Http {
            url: url.to_string(),
            source,
        })?
    {
        file.write_all(&chunk).await.map_err(write_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(write_error)?;
    file.sync_all().await.map_err(write_error)?;
    Ok(written)
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// SUCCESS was reported but nothing could be downloaded.
    #[error("success but no files found in response")]
    NoArtifacts {
        job_id: String,
        failed_downloads: usize,
    },

    #[error("download failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,
}
