//! Completion callbacks.

use crate::error::{OrchestrationError, Result};
use async_trait::async_trait;
use kernel_types::Operation;
use std::time::Duration;
use tracing::debug;

/// Tells a client that its operation reached a terminal or failed state.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, url: &str, operation: &Operation) -> Result<()>;
}

/// POSTs the operation as JSON to the callback URL.
pub struct HttpCallbackNotifier {
    client: reqwest::Client,
}

impl HttpCallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestrationError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, url: &str, operation: &Operation) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(operation)
            .send()
            .await
            .map_err(|e| OrchestrationError::Internal(format!("Callback to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestrationError::Internal(format!(
                "Callback to {} returned {}",
                url, status
            )));
        }

        debug!("Delivered callback for operation {} to {}", operation.id, url);
        Ok(())
    }
}
