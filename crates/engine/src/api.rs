//! REST API client for the generation engine's HTTP surface.
//!
//! [`EngineApi`] is the narrow seam the session layer depends on
//! (submit, history, interrupt). [`HttpEngineApi`] implements it over
//! [`reqwest`] and adds the remaining control and status endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use studio_core::generation::GenerateRequest;
use studio_core::types::{ImageRef, PromptId};

/// Timeout applied to the engine reachability check.
const TEST_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response returned by `POST /generate` after the job was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: PromptId,
    /// Position in the execution queue.
    pub number: u32,
}

/// Response of `GET /history/{prompt_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub prompt_id: PromptId,
    /// Engine status string, e.g. `success` or `error`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Acknowledgement returned by the control endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Whether the backend can reach the engine itself.
    pub comfyui: bool,
}

/// Queue depth as reported by `GET /queue`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSnapshot {
    pub running: u32,
    pub pending: u32,
    #[serde(default)]
    pub running_prompts: Vec<serde_json::Value>,
    #[serde(default)]
    pub pending_prompts: Vec<serde_json::Value>,
}

/// Response of `GET /status`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatus {
    pub comfyui: EngineInfo,
    pub queue: QueueCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineInfo {
    pub connected: bool,
    #[serde(default)]
    pub system: serde_json::Value,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub index: i32,
    pub vram_total: u64,
    pub vram_free: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueCounts {
    pub running: u32,
    pub pending: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TestConnectionResponse {
    success: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the engine REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Engine API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The `error` field of the body when present, the raw body otherwise.
        message: String,
    },

    /// A URL could not be built from the configured base.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The engine operations a generation session depends on.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Queue a generation job.
    async fn generate(&self, request: &GenerateRequest) -> Result<QueueResponse, EngineApiError>;

    /// Look up the outcome of a job. An error usually means the job is
    /// not resolvable yet.
    async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, EngineApiError>;

    /// Interrupt whatever the engine is executing right now.
    async fn interrupt(&self) -> Result<StatusResponse, EngineApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client for the engine's API.
pub struct HttpEngineApi {
    client: reqwest::Client,
    api_base: String,
}

impl HttpEngineApi {
    /// Create a new API client.
    ///
    /// * `api_base` - Base HTTP URL including the API prefix, e.g.
    ///   `http://host:3000/api`.
    pub fn new(api_base: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_base)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self { client, api_base }
    }

    /// Base URL all endpoint paths are appended to.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Root the health endpoint is served from: the API base without its
    /// `/api` suffix.
    pub fn health_base(&self) -> &str {
        self.api_base
            .strip_suffix("/api")
            .unwrap_or(&self.api_base)
    }

    /// Clear every pending job from the engine's queue.
    pub async fn clear(&self) -> Result<StatusResponse, EngineApiError> {
        let response = self
            .client
            .post(self.endpoint("/clear"))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the backend whether an engine answers at `url`.
    ///
    /// Any failure, including a timeout, reads as unreachable.
    pub async fn test_connection(&self, url: &str) -> bool {
        let result = self
            .client
            .post(self.endpoint("/test-comfyui"))
            .timeout(TEST_CONNECTION_TIMEOUT)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url, error = %e, "Engine connection test failed");
                return false;
            }
        };

        match Self::parse_response::<TestConnectionResponse>(response).await {
            Ok(body) => body.success,
            Err(e) => {
                tracing::debug!(url, error = %e, "Engine connection test rejected");
                false
            }
        }
    }

    /// System information and queue depth.
    pub async fn status(&self) -> Result<SystemStatus, EngineApiError> {
        let response = self.client.get(self.endpoint("/status")).send().await?;
        Self::parse_response(response).await
    }

    /// Running and pending jobs.
    pub async fn queue(&self) -> Result<QueueSnapshot, EngineApiError> {
        let response = self.client.get(self.endpoint("/queue")).send().await?;
        Self::parse_response(response).await
    }

    /// Liveness of the backend and its engine.
    pub async fn health(&self) -> Result<HealthResponse, EngineApiError> {
        let response = self
            .client
            .get(format!("{}/health", self.health_base()))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// URL the backend serves a produced image from.
    pub fn image_url(&self, image: &ImageRef) -> Result<String, EngineApiError> {
        let mut url =
            Url::parse(&self.api_base).map_err(|e| EngineApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| EngineApiError::InvalidUrl(self.api_base.clone()))?
            .pop_if_empty()
            .push("images")
            .push(&image.filename);
        url.query_pairs_mut()
            .append_pair("subfolder", &image.subfolder)
            .append_pair("type", &image.image_type);
        Ok(url.into())
    }

    // ---- private helpers ----

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Ensure the response has a success status code, turning the error
    /// body into an [`EngineApiError::Api`] otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, EngineApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(EngineApiError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl EngineApi for HttpEngineApi {
    async fn generate(&self, request: &GenerateRequest) -> Result<QueueResponse, EngineApiError> {
        let response = self
            .client
            .post(self.endpoint("/generate"))
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, EngineApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("/history/{prompt_id}")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn interrupt(&self) -> Result<StatusResponse, EngineApiError> {
        let response = self
            .client
            .post(self.endpoint("/interrupt"))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

/// URL the engine itself serves a produced image from (`/view`).
pub fn view_url(engine_url: &str, image: &ImageRef) -> Result<String, EngineApiError> {
    let base = studio_core::preferences::normalize_engine_url(engine_url);
    let mut url = Url::parse(&format!("{base}/view"))
        .map_err(|e| EngineApiError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("filename", &image.filename)
        .append_pair("subfolder", &image.subfolder)
        .append_pair("type", &image.image_type);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageRef {
        ImageRef {
            filename: "out 1.png".into(),
            subfolder: "batch".into(),
            image_type: "output".into(),
        }
    }

    #[test]
    fn health_is_served_from_root() {
        let api = HttpEngineApi::new("http://localhost:3000/api/");
        assert_eq!(api.api_base(), "http://localhost:3000/api");
        assert_eq!(api.health_base(), "http://localhost:3000");
    }

    #[test]
    fn health_base_without_api_prefix_is_unchanged() {
        let api = HttpEngineApi::new("http://localhost:3000");
        assert_eq!(api.health_base(), "http://localhost:3000");
    }

    #[test]
    fn image_url_encodes_components() {
        let api = HttpEngineApi::new("http://localhost:3000/api");
        assert_eq!(
            api.image_url(&image()).unwrap(),
            "http://localhost:3000/api/images/out%201.png?subfolder=batch&type=output"
        );
    }

    #[test]
    fn view_url_normalizes_engine_address() {
        assert_eq!(
            view_url("127.0.0.1:8188/", &image()).unwrap(),
            "http://127.0.0.1:8188/view?filename=out+1.png&subfolder=batch&type=output"
        );
    }

    #[test]
    fn history_tolerates_missing_fields() {
        let history: HistoryResponse = serde_json::from_str(r#"{"prompt_id":"p1"}"#).unwrap();
        assert!(history.images.is_empty());
        assert!(!history.completed);
        assert!(history.status.is_empty());
    }
}
