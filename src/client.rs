//! HTTP client for the estimate API, used by the CLI.
//!
//! Configuration is via environment variables:
//! - `ESTIMATE_URL` - Base URL (default: `http://localhost:5000/api`)
//! - `ESTIMATE_API_KEY` - API key for authentication (optional for local)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::*;

/// Default URL for local development.
const DEFAULT_URL: &str = "http://localhost:5000/api";

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
pub struct EstimateClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl EstimateClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("ESTIMATE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let api_key = std::env::var("ESTIMATE_API_KEY").ok();
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(body)),
            StatusCode::BAD_REQUEST => Err(ClientError::BadRequest(body)),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            _ => Err(ClientError::Server(format!("{}: {}", status, body))),
        }
    }

    // ============================================================
    // Estimates
    // ============================================================

    pub async fn list_estimates(&self) -> Result<Vec<EstimateRecord>, ClientError> {
        let response = self
            .request(reqwest::Method::GET, "/estimates")
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_estimate(&self, id: &str) -> Result<EstimateRecord, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/estimates/{}", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_totals(&self, id: &str) -> Result<EstimateTotals, ClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/estimates/{}/totals", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    // ============================================================
    // Drafts
    // ============================================================

    pub async fn list_drafts(&self, estimate_id: &str) -> Result<Vec<Draft>, ClientError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/estimates/{}/drafts", estimate_id),
            )
            .send()
            .await?;
        self.handle_response(response).await
    }
}
