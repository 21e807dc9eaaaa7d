//! HTTP client for the auto-mode API.
//!
//! Used by the MCP bridge and the CLI commands to talk to a running server.
//! Configuration is via environment variables:
//! - `AUTOMODE_URL` - Base URL (default: `http://localhost:17010/api/v1`)
//! - `AUTOMODE_API_KEY` - API key for authentication (optional for local)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::api::types::*;
use crate::models::*;

/// Default URL for local development.
pub const DEFAULT_URL: &str = "http://localhost:17010/api/v1";

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone)]
pub struct AutoModeClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl AutoModeClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("AUTOMODE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let api_key = std::env::var("AUTOMODE_API_KEY").ok();
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Map non-2xx responses to `ClientError`, pulling `error` out of the
    /// JSON envelope when there is one.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or(body);
        match status {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(message)),
            StatusCode::BAD_REQUEST => Err(ClientError::BadRequest(message)),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            _ => Err(ClientError::Server(format!("{}: {}", status, message))),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Auto-mode
    // ============================================================

    pub async fn start(
        &self,
        project_path: &str,
        branch_name: Option<&str>,
        max_concurrency: Option<usize>,
    ) -> Result<StartResponse, ClientError> {
        let body = StartRequest {
            project_path: Some(project_path.to_string()),
            branch_name: branch_name.map(str::to_string),
            max_concurrency: max_concurrency.map(|m| m as f64),
        };
        self.post("/auto-mode/start", &body).await
    }

    pub async fn stop(
        &self,
        project_path: &str,
        branch_name: Option<&str>,
    ) -> Result<StopResponse, ClientError> {
        let body = StopRequest {
            project_path: Some(project_path.to_string()),
            branch_name: branch_name.map(str::to_string),
        };
        self.post("/auto-mode/stop", &body).await
    }

    pub async fn project_status(
        &self,
        project_path: &str,
        branch_name: Option<&str>,
    ) -> Result<ProjectStatusResponse, ClientError> {
        let body = StatusRequest {
            project_path: Some(project_path.to_string()),
            branch_name: branch_name.map(str::to_string),
        };
        self.post("/auto-mode/status", &body).await
    }

    pub async fn global_status(&self) -> Result<GlobalStatusResponse, ClientError> {
        self.post("/auto-mode/status", &StatusRequest::default())
            .await
    }

    // ============================================================
    // Features
    // ============================================================

    pub async fn list_features(&self, project_path: &str) -> Result<Vec<Feature>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/features")
            .query(&[("projectPath", project_path)])
            .send()
            .await?;
        let list: FeatureListResponse = self.handle_response(response).await?;
        Ok(list.features)
    }

    pub async fn create_feature(
        &self,
        project_path: &str,
        input: CreateFeatureInput,
    ) -> Result<Feature, ClientError> {
        let body = CreateFeatureRequest {
            project_path: Some(project_path.to_string()),
            feature: input,
        };
        let created: FeatureResponse = self.post("/features", &body).await?;
        Ok(created.feature)
    }

    pub async fn update_feature(
        &self,
        project_path: &str,
        feature_id: &str,
        input: &UpdateFeatureInput,
    ) -> Result<Feature, ClientError> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/features/{}", feature_id))
            .query(&[("projectPath", project_path)])
            .json(input)
            .send()
            .await?;
        let updated: FeatureResponse = self.handle_response(response).await?;
        Ok(updated.feature)
    }

    pub async fn find_cycles(&self, project_path: &str) -> Result<Vec<Vec<String>>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/features/cycles")
            .query(&[("projectPath", project_path)])
            .send()
            .await?;
        let cycles: CyclesResponse = self.handle_response(response).await?;
        Ok(cycles.cycles)
    }
}
