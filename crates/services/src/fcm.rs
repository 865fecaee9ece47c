//! Firebase Cloud Messaging over the legacy HTTP API.
//!
//! Payloads are forwarded verbatim; the gateway only checks that they carry
//! exactly one kind of target and reads the per-target results to report
//! dead registrations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use pushgate_common::error::AppError;
use pushgate_common::types::PushStatus;
use pushgate_engine::feedback::FeedbackCollector;
use pushgate_engine::service::{PushService, ServiceMessage};

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// FCM rejects multicast requests with this many targets or more.
const MAX_REGISTRATION_IDS: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Result errors meaning the target will never accept messages again.
const INVALID_TARGET_ERRORS: [&str; 2] = ["InvalidRegistration", "NotRegistered"];

pub struct Fcm {
    api_key: String,
    endpoint: String,
}

impl Fcm {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AppError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::Config("FCM API key is empty".into()));
        }
        Ok(Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct FcmPayload {
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    registration_ids: Vec<String>,
    #[serde(default)]
    collapse_key: Option<String>,
}

/// A validated FCM request.
#[derive(Debug, Clone)]
pub struct FcmMessage {
    /// Targets in request order, matching the order of the response results.
    targets: Vec<String>,
    squash_key: String,
    raw: Vec<u8>,
}

impl FcmMessage {
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl ServiceMessage for FcmMessage {
    fn squash_key(&self) -> &str {
        &self.squash_key
    }
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: u64,
    #[serde(default)]
    failure: u64,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl PushService for Fcm {
    type Client = reqwest::Client;
    type Message = FcmMessage;

    fn id(&self) -> &str {
        "fcm"
    }

    fn display_name(&self) -> &str {
        "FCM"
    }

    fn new_client(&self) -> Result<reqwest::Client, AppError> {
        reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ServiceSetup(format!("FCM HTTP client: {}", e)))
    }

    fn convert_message(&self, raw: &[u8]) -> Result<FcmMessage, AppError> {
        let payload: FcmPayload = serde_json::from_slice(raw)
            .map_err(|e| AppError::Validation(format!("Invalid FCM payload: {}", e)))?;

        let targets = match (payload.to, payload.registration_ids.is_empty()) {
            (Some(to), false) if !to.is_empty() => {
                return Err(AppError::Validation(
                    "both to/registration_ids specified".into(),
                ));
            }
            (Some(to), true) if !to.is_empty() => vec![to],
            (_, false) if payload.registration_ids.len() >= MAX_REGISTRATION_IDS => {
                return Err(AppError::Validation("too many tokens".into()));
            }
            (_, false) => payload.registration_ids,
            _ => return Err(AppError::Validation("no token specified".into())),
        };

        let squash_key = payload
            .collapse_key
            .unwrap_or_else(|| targets.join(","));

        Ok(FcmMessage {
            targets,
            squash_key,
            raw: raw.to_vec(),
        })
    }

    async fn push_message(
        &self,
        client: &reqwest::Client,
        message: FcmMessage,
        feedback: &dyn FeedbackCollector,
    ) -> PushStatus {
        let response = match client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("key={}", self.api_key))
            .body(message.raw)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(service = self.id(), error = %e, "Posting to FCM failed");
                return PushStatus::TempFail;
            }
        };

        let status = response.status();
        if status.is_client_error() {
            tracing::warn!(service = self.id(), status = status.as_u16(), "FCM rejected request");
            return PushStatus::HardFail;
        }
        if status.is_server_error() {
            tracing::warn!(service = self.id(), status = status.as_u16(), "FCM upstream error");
            return PushStatus::TempFail;
        }

        let body: FcmResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(service = self.id(), error = %e, "Decoding FCM response failed");
                return PushStatus::TempFail;
            }
        };

        tracing::debug!(
            service = self.id(),
            success = body.success,
            failure = body.failure,
            "FCM accepted request"
        );
        for (target, result) in message.targets.iter().zip(&body.results) {
            match result.error.as_deref() {
                None | Some("") => {}
                Some(error) if INVALID_TARGET_ERRORS.contains(&error) => {
                    feedback.token_invalid(self.id(), target);
                }
                Some(error) => {
                    tracing::warn!(service = self.id(), error, "FCM delivery error for target");
                }
            }
        }

        PushStatus::Success
    }
}
