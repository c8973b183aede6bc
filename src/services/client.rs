use base64::Engine;
use reqwest::multipart::Form;
use reqwest::Client;
use serde::Serialize;

use crate::config::ApiKey;

/// Client for the remote image-to-3D job service.
pub struct Model3dClient {
    http: Client,
    base_url: String,
    api_key: ApiKey,
}

/// Typed submission request used by the structured strategy.
#[derive(Debug, Serialize)]
pub struct ImageToModelRequest {
    #[serde(rename = "type")]
    pub task_type: &'static str,
    pub file: ImagePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImagePayload {
    /// Image format, e.g. "png".
    #[serde(rename = "type")]
    pub format: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

impl ImageToModelRequest {
    pub fn new(image_bytes: &[u8], format: &str, prompt: Option<String>) -> Self {
        Self {
            task_type: "image_to_model",
            file: ImagePayload {
                format: format.to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(image_bytes),
            },
            prompt,
        }
    }
}

/// Status code and body of a completed HTTP exchange, kept verbatim for
/// debug records.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Short human-readable form, used in status messages.
    pub fn summary(&self) -> String {
        let body: String = self.body.chars().take(200).collect();
        format!("HTTP {}: {}", self.status, body.trim())
    }
}

impl Model3dClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn task_url(&self) -> String {
        format!("{}/task", self.base_url)
    }

    /// Submit a typed JSON request. Non-2xx responses are returned, not
    /// raised, so the caller can decide whether to try another strategy.
    pub async fn submit_json(
        &self,
        request: &ImageToModelRequest,
    ) -> Result<RawResponse, reqwest::Error> {
        let response = self
            .http
            .post(self.task_url())
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await?;

        Self::read_raw(response).await
    }

    /// Submit a hand-built multipart form.
    pub async fn submit_multipart(&self, form: Form) -> Result<RawResponse, reqwest::Error> {
        let response = self
            .http
            .post(self.task_url())
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .send()
            .await?;

        Self::read_raw(response).await
    }

    /// Query a job's status payload.
    pub async fn query_task(
        &self,
        job_id: &str,
        region: Option<&str>,
    ) -> Result<serde_json::Value, ClientError> {
        let mut request = self
            .http
            .get(format!("{}/task/{}", self.base_url, job_id))
            .bearer_auth(self.api_key.expose());
        if let Some(region) = region {
            request = request.query(&[("region", region)]);
        }

        let raw = Self::read_raw(request.send().await?).await?;
        if !raw.is_success() {
            return Err(ClientError::Api {
                status: raw.status,
                body: raw.body,
            });
        }
        raw.json().map_err(ClientError::Parse)
    }

    async fn read_raw(response: reqwest::Response) -> Result<RawResponse, reqwest::Error> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Job service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse job service response: {0}")]
    Parse(#[from] serde_json::Error),
}
