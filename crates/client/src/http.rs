use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use pushgate_common::error::AppError;

use crate::Client;

/// Submits payloads through the gateway's ingestion endpoint.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpClient {
    /// `base_url` is the gateway root, e.g. `http://localhost:8322`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn push_raw(&self, service_id: &str, data: &[u8]) -> Result<(), AppError> {
        let url = format!("{}/api/push/{}", self.base_url, service_id);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| AppError::Queue(format!("Posting to gateway: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body["error"].as_str().map(str::to_string))
            .unwrap_or_else(|| status.to_string());

        Err(match status {
            StatusCode::NOT_FOUND => AppError::UnknownService(service_id.to_string()),
            StatusCode::BAD_REQUEST => AppError::Validation(message),
            _ => AppError::Queue(format!("Gateway returned {}: {}", status, message)),
        })
    }
}
