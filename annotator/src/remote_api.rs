//! Remote API collaborator - the REST surface the operation queue replays
//! pending operations against.
//!
//! Any `Err` returned here counts as a failed attempt for retry accounting;
//! the queue does not distinguish transient from permanent failures.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error, Clone)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_project(&self, payload: &Value) -> Result<(), ApiError>;

    async fn update_project(&self, project_id: &str, payload: &Value) -> Result<(), ApiError>;

    async fn delete_project(&self, project_id: &str) -> Result<(), ApiError>;
}

/// reqwest client for the project REST endpoints under `base_url`.
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("annotator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn projects_url(&self) -> String {
        format!("{}/projects", self.base_url)
    }

    fn project_url(&self, project_id: &str) -> String {
        format!("{}/projects/{}", self.base_url, project_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_project(&self, payload: &Value) -> Result<(), ApiError> {
        self.send(self.http.post(self.projects_url()).json(payload))
            .await
    }

    async fn update_project(&self, project_id: &str, payload: &Value) -> Result<(), ApiError> {
        self.send(self.http.put(self.project_url(project_id)).json(payload))
            .await
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), ApiError> {
        self.send(self.http.delete(self.project_url(project_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_urls_strip_trailing_slash() {
        let api = HttpRemoteApi::new("http://localhost:3000/api/", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(api.projects_url(), "http://localhost:3000/api/projects");
        assert_eq!(
            api.project_url("p-42"),
            "http://localhost:3000/api/projects/p-42"
        );
    }

    /// Serve one canned HTTP response on a loopback port.
    fn serve_once(response: &'static [u8]) -> (String, std::thread::JoinHandle<()>) {
        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind local test server");
        let port = listener
            .local_addr()
            .expect("failed to read local addr")
            .port();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request_buf = [0_u8; 4096];
                let _ = std::io::Read::read(&mut stream, &mut request_buf);
                let _ = std::io::Write::write_all(&mut stream, response);
            }
        });
        (format!("http://127.0.0.1:{port}/api"), server)
    }

    #[tokio::test]
    async fn test_non_success_status_is_status_error() {
        let (base_url, server) = serve_once(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        );
        let api = HttpRemoteApi::new(base_url, Some("token".to_string()), Duration::from_secs(5))
            .unwrap();

        let err = api.delete_project("p1").await.unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_success_status_is_ok() {
        let (base_url, server) =
            serve_once(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n");
        let api = HttpRemoteApi::new(base_url, None, Duration::from_secs(5)).unwrap();

        api.delete_project("p1").await.unwrap();
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let api = HttpRemoteApi::new("http://127.0.0.1:9/api", None, Duration::from_millis(500))
            .unwrap();
        let err = api.delete_project("p1").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
