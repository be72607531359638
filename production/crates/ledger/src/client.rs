//! JSON-over-HTTP ledger client.
//!
//! One `HttpLedgerClient` talks to one collaborator base URL and
//! implements whichever collaborator contract that service speaks:
//! - `POST <base>/witness`
//! - `POST <base>/settle`
//! - `POST <base>/invoke`

use async_trait::async_trait;
use kernel_types::registry::{self, codes, RetryPolicy};
use kernel_types::{ContractReceipt, SettlementReceipt, WitnessReceipt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::types::{ContractCallRequest, RejectionBody, SettlementRequest, WitnessRequest};
use crate::{ContractClient, SettlementClient, WitnessClient};

/// Errors that can occur when talking to a ledger collaborator.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger call timed out: {0}")]
    Timeout(String),

    #[error("Ledger network congested: {0}")]
    Congestion(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Ledger rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Ledger call failed: {0}")]
    Failed(String),

    #[error("Failed to parse response: {0}")]
    ParseResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Build the error for a `{code, message}` rejection body.
    pub fn from_rejection(body: RejectionBody) -> Self {
        match body.code.as_str() {
            codes::INSUFFICIENT_FUNDS => LedgerError::InsufficientFunds(body.message),
            codes::ALREADY_PROCESSED => LedgerError::AlreadyProcessed(body.message),
            codes::INVALID_SIGNATURE => LedgerError::InvalidSignature(body.message),
            codes::NETWORK_CONGESTION => LedgerError::Congestion(body.message),
            codes::LEDGER_TIMEOUT => LedgerError::Timeout(body.message),
            codes::LEDGER_UNAVAILABLE => LedgerError::Unavailable(body.message),
            _ => LedgerError::Rejected {
                code: body.code,
                message: body.message,
            },
        }
    }

    /// Map a non-success HTTP response onto the error taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            502 | 503 => LedgerError::Unavailable(format!("HTTP {}: {}", status, body)),
            408 | 504 => LedgerError::Timeout(format!("HTTP {}: {}", status, body)),
            429 => LedgerError::Congestion(format!("HTTP {}: {}", status, body)),
            400..=499 => match serde_json::from_str::<RejectionBody>(body) {
                Ok(rejection) => LedgerError::from_rejection(rejection),
                Err(_) => LedgerError::Failed(format!("HTTP {}: {}", status, body)),
            },
            _ => LedgerError::Failed(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Registry code supplied by the collaborator, if any. Generic failures
    /// carry none and are reported as `PROCESSING_FAILED` by the caller.
    pub fn code(&self) -> Option<&str> {
        match self {
            LedgerError::Unavailable(_) => Some(codes::LEDGER_UNAVAILABLE),
            LedgerError::Timeout(_) => Some(codes::LEDGER_TIMEOUT),
            LedgerError::Congestion(_) => Some(codes::NETWORK_CONGESTION),
            LedgerError::InsufficientFunds(_) => Some(codes::INSUFFICIENT_FUNDS),
            LedgerError::AlreadyProcessed(_) => Some(codes::ALREADY_PROCESSED),
            LedgerError::InvalidSignature(_) => Some(codes::INVALID_SIGNATURE),
            LedgerError::Rejected { code, .. } => Some(code.as_str()),
            LedgerError::Failed(_)
            | LedgerError::ParseResponse(_)
            | LedgerError::Configuration(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Configuration(_) | LedgerError::ParseResponse(_) => false,
            _ => registry::is_retryable(self.code().unwrap_or(codes::PROCESSING_FAILED)),
        }
    }
}

/// Async client for one ledger collaborator.
pub struct HttpLedgerClient {
    api_base: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpLedgerClient {
    /// Create a client with a per-request timeout.
    pub fn new(api_base: impl Into<String>, request_timeout: Duration) -> Result<Self, LedgerError> {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
            return Err(LedgerError::Configuration(format!(
                "Ledger URL must be http(s): {}",
                api_base
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Configuration(e.to_string()))?;

        Ok(Self {
            api_base,
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn post_once<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, LedgerError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self.client.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout(e.to_string())
            } else {
                LedgerError::Unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::ParseResponse(e.to_string()))
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, LedgerError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.api_base, path);
        debug!("POST {}", url);
        let url = url.as_str();

        registry::with_retry(
            &self.retry,
            |_| self.post_once(url, body),
            LedgerError::is_retryable,
        )
        .await
    }
}

#[async_trait]
impl WitnessClient for HttpLedgerClient {
    async fn witness(&self, request: &WitnessRequest) -> Result<WitnessReceipt, LedgerError> {
        self.post("witness", request).await
    }
}

#[async_trait]
impl SettlementClient for HttpLedgerClient {
    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementReceipt, LedgerError> {
        self.post("settle", request).await
    }
}

#[async_trait]
impl ContractClient for HttpLedgerClient {
    async fn invoke(&self, request: &ContractCallRequest) -> Result<ContractReceipt, LedgerError> {
        self.post("invoke", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(LedgerError::from_status(503, ""), LedgerError::Unavailable(_)));
        assert!(matches!(LedgerError::from_status(502, ""), LedgerError::Unavailable(_)));
        assert!(matches!(LedgerError::from_status(504, ""), LedgerError::Timeout(_)));
        assert!(matches!(LedgerError::from_status(408, ""), LedgerError::Timeout(_)));
        assert!(matches!(LedgerError::from_status(429, ""), LedgerError::Congestion(_)));
        assert!(matches!(LedgerError::from_status(500, "boom"), LedgerError::Failed(_)));
        assert!(matches!(LedgerError::from_status(400, "not json"), LedgerError::Failed(_)));
    }

    #[test]
    fn test_rejection_body_mapping() {
        let err = LedgerError::from_status(
            400,
            r#"{"code":"INSUFFICIENT_FUNDS","message":"balance too low"}"#,
        );
        assert!(matches!(err, LedgerError::InsufficientFunds(_)));
        assert_eq!(err.code(), Some(codes::INSUFFICIENT_FUNDS));
        assert!(!err.is_retryable());

        let err = LedgerError::from_status(409, r#"{"code":"TOPIC_CLOSED","message":"closed"}"#);
        assert_eq!(err.code(), Some("TOPIC_CLOSED"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_codes_and_retryability() {
        assert_eq!(LedgerError::Failed("x".into()).code(), None);
        assert!(LedgerError::Failed("x".into()).is_retryable());
        assert!(LedgerError::Timeout("x".into()).is_retryable());
        assert!(LedgerError::Congestion("x".into()).is_retryable());
        assert!(!LedgerError::ParseResponse("x".into()).is_retryable());
        assert!(!LedgerError::InvalidSignature("x".into()).is_retryable());
    }

    #[test]
    fn test_client_configuration() {
        let client = HttpLedgerClient::new("http://witness.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.api_base(), "http://witness.local");
        assert!(matches!(
            HttpLedgerClient::new("ftp://nope", Duration::from_secs(5)),
            Err(LedgerError::Configuration(_))
        ));
    }
}
