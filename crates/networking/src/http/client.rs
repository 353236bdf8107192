//! Stoat HTTP client for the job, effect, and health endpoints

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, Response, StatusCode,
};
use serde_json::Value;
use stoat_core::{
    ClientSettings, Error, HealthResponse, HealthStatus, JobSnapshot, JobSubmitResponse, Result,
    ScanRequest,
};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const API_PREFIX: &str = "/api/v1";
const USER_AGENT_VALUE: &str = concat!("stoat-client/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the Stoat backend
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct StoatClient {
    http: Client,
    base_url: String,
}

impl StoatClient {
    /// Create a client for the backend at `base_url` (e.g. `http://localhost:8000`)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::InvalidConfig("API base URL is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, base_url })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self> {
        Self::with_timeout(&settings.api_base_url, settings.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Turn a non-2xx response into an error carrying the server's message
    async fn check_response(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("{} failed: HTTP {}", what, status.as_u16()));

        error!("{} request failed with status {}: {}", what, status, message);
        Err(Error::ApiError(message))
    }

    /// Submit a directory scan, returning the job id to poll
    #[instrument(skip(self))]
    pub async fn submit_scan(&self, request: &ScanRequest) -> Result<String> {
        let url = self.api_url("/videos/scan");
        debug!("Submitting scan of {} (recursive: {})", request.path, request.recursive);

        let response = self
            .http
            .post(&url)
            .headers(Self::default_headers())
            .json(request)
            .send()
            .await?;

        let response = Self::check_response(response, "Scan").await?;

        let submitted: JobSubmitResponse = response.json().await.map_err(|e| {
            error!("Failed to parse scan submit response: {}", e);
            Error::InvalidData(e.to_string())
        })?;

        debug!("Scan submitted as job {}", submitted.job_id);
        Ok(submitted.job_id)
    }

    /// Fetch the current status of a job
    #[instrument(skip(self))]
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobSnapshot> {
        let url = self.api_url(&format!("/jobs/{}", job_id));

        let response = self
            .http
            .get(&url)
            .headers(Self::default_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::JobNotFound(job_id.to_string()));
        }

        let response = Self::check_response(response, "Job status").await?;

        let snapshot: JobSnapshot = response.json().await.map_err(|e| {
            error!("Failed to parse job status response: {}", e);
            Error::InvalidData(e.to_string())
        })?;

        debug!("Job {} is {} ({:?})", job_id, snapshot.status, snapshot.progress);
        Ok(snapshot)
    }

    /// Ask the server to stop a job. Completion is observed by polling.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let url = self.api_url(&format!("/jobs/{}/cancel", job_id));

        let response = self
            .http
            .post(&url)
            .headers(Self::default_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::JobNotFound(job_id.to_string()));
        }

        Self::check_response(response, "Cancel").await?;
        debug!("Cancellation requested for job {}", job_id);
        Ok(())
    }

    /// Render the FFmpeg filter string for an effect with the given parameters
    #[instrument(skip(self, parameters))]
    pub async fn preview_effect(&self, effect_type: &str, parameters: &Value) -> Result<String> {
        let url = self.api_url("/effects/preview");
        let body = serde_json::json!({
            "effect_type": effect_type,
            "parameters": parameters,
        });

        let response = self
            .http
            .post(&url)
            .headers(Self::default_headers())
            .json(&body)
            .send()
            .await?;

        let response = Self::check_response(response, "Preview").await?;

        let preview: PreviewResponse = response.json().await.map_err(|e| {
            error!("Failed to parse preview response: {}", e);
            Error::InvalidData(e.to_string())
        })?;

        Ok(preview.filter_string)
    }

    /// Readiness probe. Any failure to reach or parse the endpoint is `Unhealthy`.
    #[instrument(skip(self))]
    pub async fn health(&self) -> HealthStatus {
        let url = format!("{}/health/ready", self.base_url);

        let response = match self.http.get(&url).headers(Self::default_headers()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Health probe failed: {}", e);
                return HealthStatus::Unhealthy;
            }
        };

        // 503 still carries a body describing which checks failed
        match response.json::<HealthResponse>().await {
            Ok(health) => health.health_status(),
            Err(e) => {
                warn!("Unreadable health response: {}", e);
                HealthStatus::Unhealthy
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct PreviewResponse {
    filter_string: String,
}

/// Pull a human-readable message out of an error body.
///
/// Accepts `{"detail": {"message": ..}}`, `{"detail": ".."}` and `{"message": ..}`.
fn extract_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let message = json
        .pointer("/detail/message")
        .or_else(|| json.get("detail").filter(|d| d.is_string()))
        .or_else(|| json.get("message"))?;
    message.as_str().map(str::to_string)
}
