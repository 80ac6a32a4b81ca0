//! Payment API Client
//!
//! One-shot calls against the payment server. None of these are retried
//! here: creation in particular must never be auto-retried, since a retried
//! POST under a flaky network can mint a second token.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{CreateIntentRequest, DepositInstructions, IntentReceipt, StatusReport};
use crate::config::ApiConfig;
use crate::core_types::IntentToken;

/// Failure of a single payment API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Server refused the request as invalid (4xx with an error body)
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Server-side failure (5xx)
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Token not found")]
    NotFound,

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// The server answered and said the request or token is invalid
    pub fn is_definitive(&self) -> bool {
        matches!(self, ApiError::Rejected { .. } | ApiError::NotFound)
    }
}

/// Payment server operations consumed by the coordinator, rails and channels
#[async_trait]
pub trait PaymentApi: Send + Sync {
    /// Create a new intent (`POST /payments/intents`)
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<IntentReceipt, ApiError>;

    /// Live status of a token (`GET /payments/intents/{token}`)
    async fn check_status(&self, token: &IntentToken) -> Result<StatusReport, ApiError>;

    /// Deposit address/memo for manual exchange transfers
    async fn deposit_instructions(
        &self,
        token: &IntentToken,
    ) -> Result<DepositInstructions, ApiError>;

    /// Deduct points for the intent; resolves it synchronously
    async fn deduct_points(&self, token: &IntentToken) -> Result<StatusReport, ApiError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// `reqwest`-backed payment API client
#[derive(Debug, Clone)]
pub struct HttpPaymentApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn intent_url(&self, token: &IntentToken, suffix: &str) -> String {
        format!("{}/payments/intents/{}{}", self.base_url, token, suffix)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let request_id = uuid::Uuid::new_v4();
        let response = req
            .header("x-request-id", request_id.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout
                } else {
                    ApiError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(%request_id, status = status.as_u16(), "Payment API response");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if status.is_server_error() {
            warn!(%request_id, status = status.as_u16(), "Payment API server error");
            return Err(ApiError::Server {
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("rejected").to_string(),
            };
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PaymentApi for HttpPaymentApi {
    async fn create_intent(&self, req: &CreateIntentRequest) -> Result<IntentReceipt, ApiError> {
        let url = format!("{}/payments/intents", self.base_url);
        self.send(self.client.post(url).json(req)).await
    }

    async fn check_status(&self, token: &IntentToken) -> Result<StatusReport, ApiError> {
        self.send(self.client.get(self.intent_url(token, ""))).await
    }

    async fn deposit_instructions(
        &self,
        token: &IntentToken,
    ) -> Result<DepositInstructions, ApiError> {
        self.send(self.client.get(self.intent_url(token, "/deposit")))
            .await
    }

    async fn deduct_points(&self, token: &IntentToken) -> Result<StatusReport, ApiError> {
        self.send(self.client.post(self.intent_url(token, "/points")))
            .await
    }
}
