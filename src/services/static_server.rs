use axum::Router;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Best-effort static file server for published artifacts, started at most
/// once per process and only when nothing already answers on the prefix.
pub struct StaticServer {
    http: reqwest::Client,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StaticServer {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            handle: Mutex::new(None),
        }
    }

    /// Returns `true` when this call started a server.
    pub async fn ensure_running(
        &self,
        probe_url: &str,
        base_url: &str,
        serve_dir: &Path,
    ) -> Result<bool, StaticServerError> {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }

        if self
            .http
            .get(probe_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
        {
            tracing::debug!(url = %probe_url, "Static server already reachable");
            return Ok(false);
        }

        let parsed = url::Url::parse(base_url)?;
        let host = parsed.host_str().ok_or(StaticServerError::MissingHost)?;
        let port = parsed
            .port_or_known_default()
            .ok_or(StaticServerError::MissingHost)?;
        let addr = format!("{}:{}", host, port);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(StaticServerError::Bind)?;
        let app = Router::new().fallback_service(ServeDir::new(serve_dir));

        tracing::info!(addr = %addr, dir = %serve_dir.display(), "Started static artifact server");
        *handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Static artifact server stopped");
            }
        }));
        Ok(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StaticServerError {
    #[error("Invalid publish base URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Publish base URL has no host or port")]
    MissingHost,

    #[error("Failed to bind static server: {0}")]
    Bind(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_starts_once_and_serves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.glb"), b"glTF").unwrap();

        let base = format!("http://127.0.0.1:{}", free_port());
        let probe = format!("{}/out.glb", base);
        let http = reqwest::Client::new();
        let server = StaticServer::new(http.clone());

        assert!(server.ensure_running(&probe, &base, dir.path()).await.unwrap());
        assert!(!server.ensure_running(&probe, &base, dir.path()).await.unwrap());

        let body = http.get(&probe).send().await.unwrap().bytes().await.unwrap();
        assert_eq!(&body[..], b"glTF");
    }

    #[tokio::test]
    async fn test_rejects_base_without_host() {
        let dir = tempfile::tempdir().unwrap();
        let server = StaticServer::new(reqwest::Client::new());
        let err = server
            .ensure_running("unix:/run/x.glb", "unix:/run/foo.socket", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StaticServerError::MissingHost));
    }
}
