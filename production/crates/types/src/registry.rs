//! Static catalog of error codes and the retry/backoff helpers built on it.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Error code constants
pub mod codes {
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const OPERATION_NOT_FOUND: &str = "OPERATION_NOT_FOUND";
    pub const INVALID_STATE_TRANSITION: &str = "INVALID_STATE_TRANSITION";
    pub const OPERATION_NOT_CANCELLABLE: &str = "OPERATION_NOT_CANCELLABLE";
    pub const OPERATION_NOT_RETRYABLE: &str = "OPERATION_NOT_RETRYABLE";
    pub const PROCESSING_FAILED: &str = "PROCESSING_FAILED";
    pub const LEDGER_UNAVAILABLE: &str = "LEDGER_UNAVAILABLE";
    pub const LEDGER_TIMEOUT: &str = "LEDGER_TIMEOUT";
    pub const NETWORK_CONGESTION: &str = "NETWORK_CONGESTION";
    pub const INSUFFICIENT_FUNDS: &str = "INSUFFICIENT_FUNDS";
    pub const ALREADY_PROCESSED: &str = "ALREADY_PROCESSED";
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
    pub const LEDGER_REJECTED: &str = "LEDGER_REJECTED";
    pub const TIMING_DEGRADED: &str = "TIMING_DEGRADED";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Reference record for a single error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDefinition {
    pub code: &'static str,
    pub message: &'static str,
    pub severity: Severity,
    pub retryable: bool,
    pub retry_after_ms: u64,
    pub max_attempts: u32,
}

const fn def(
    code: &'static str,
    message: &'static str,
    severity: Severity,
    retryable: bool,
    retry_after_ms: u64,
    max_attempts: u32,
) -> ErrorDefinition {
    ErrorDefinition {
        code,
        message,
        severity,
        retryable,
        retry_after_ms,
        max_attempts,
    }
}

pub static ERROR_DEFINITIONS: &[ErrorDefinition] = &[
    def(codes::VALIDATION_FAILED, "Request failed validation", Severity::Low, false, 0, 0),
    def(codes::OPERATION_NOT_FOUND, "Operation does not exist", Severity::Low, false, 0, 0),
    def(
        codes::INVALID_STATE_TRANSITION,
        "Requested state transition is not allowed",
        Severity::Medium,
        false,
        0,
        0,
    ),
    def(
        codes::OPERATION_NOT_CANCELLABLE,
        "Operation can no longer be cancelled",
        Severity::Low,
        false,
        0,
        0,
    ),
    def(
        codes::OPERATION_NOT_RETRYABLE,
        "Only failed operations can be retried",
        Severity::Low,
        false,
        0,
        0,
    ),
    def(
        codes::PROCESSING_FAILED,
        "Operation processing failed",
        Severity::High,
        true,
        1_000,
        3,
    ),
    def(
        codes::LEDGER_UNAVAILABLE,
        "Ledger service is unavailable",
        Severity::High,
        true,
        2_000,
        5,
    ),
    def(codes::LEDGER_TIMEOUT, "Ledger call timed out", Severity::Medium, true, 1_000, 3),
    def(
        codes::NETWORK_CONGESTION,
        "Ledger network is congested",
        Severity::Medium,
        true,
        5_000,
        5,
    ),
    def(
        codes::INSUFFICIENT_FUNDS,
        "Settlement account has insufficient funds",
        Severity::High,
        false,
        0,
        0,
    ),
    def(
        codes::ALREADY_PROCESSED,
        "Ledger reports the request was already processed",
        Severity::Low,
        false,
        0,
        0,
    ),
    def(
        codes::INVALID_SIGNATURE,
        "Ledger rejected the request signature",
        Severity::Critical,
        false,
        0,
        0,
    ),
    def(codes::LEDGER_REJECTED, "Ledger rejected the request", Severity::High, false, 0, 0),
    def(
        codes::TIMING_DEGRADED,
        "Clock synchronization is degraded",
        Severity::Medium,
        true,
        500,
        3,
    ),
    def(codes::STORAGE_ERROR, "Storage backend failure", Severity::High, true, 1_000, 3),
    def(codes::INTERNAL_ERROR, "Internal error", Severity::Critical, false, 0, 0),
];

pub fn lookup(code: &str) -> Option<&'static ErrorDefinition> {
    ERROR_DEFINITIONS.iter().find(|d| d.code == code)
}

/// Unknown codes are never retryable.
pub fn is_retryable(code: &str) -> bool {
    lookup(code).map(|d| d.retryable).unwrap_or(false)
}

pub fn suggested_retry_after(code: &str) -> Option<Duration> {
    lookup(code)
        .filter(|d| d.retryable)
        .map(|d| Duration::from_millis(d.retry_after_ms))
}

pub fn all() -> &'static [ErrorDefinition] {
    ERROR_DEFINITIONS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Constant,
}

/// Delay before attempt `attempt + 1`, capped at `max`.
pub fn calculate_backoff(
    base: Duration,
    attempt: u32,
    strategy: BackoffStrategy,
    max: Duration,
) -> Duration {
    let delay = match strategy {
        BackoffStrategy::Exponential => 1u32
            .checked_shl(attempt)
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(max),
        BackoffStrategy::Linear => base.checked_mul(attempt.saturating_add(1)).unwrap_or(max),
        BackoffStrategy::Constant => base,
    };
    delay.min(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Policy derived from the registry entry of `code`; a single attempt
    /// when the code is unknown or not retryable.
    pub fn for_code(code: &str) -> Self {
        match lookup(code).filter(|d| d.retryable) {
            Some(d) => Self {
                max_attempts: d.max_attempts.max(1),
                base_delay: Duration::from_millis(d.retry_after_ms),
                ..Self::default()
            },
            None => Self {
                max_attempts: 1,
                ..Self::default()
            },
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Run `op` until it succeeds, a non-retryable error comes back, or the
/// policy's attempts are exhausted. `op` receives the zero-based attempt.
pub async fn with_retry<T, E, F, Fut, R>(policy: &RetryPolicy, mut op: F, is_retryable: R) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = calculate_backoff(policy.base_delay, attempt, policy.strategy, policy.max_delay);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_every_code_is_registered() {
        let expected = [
            codes::VALIDATION_FAILED,
            codes::OPERATION_NOT_FOUND,
            codes::INVALID_STATE_TRANSITION,
            codes::OPERATION_NOT_CANCELLABLE,
            codes::OPERATION_NOT_RETRYABLE,
            codes::PROCESSING_FAILED,
            codes::LEDGER_UNAVAILABLE,
            codes::LEDGER_TIMEOUT,
            codes::NETWORK_CONGESTION,
            codes::INSUFFICIENT_FUNDS,
            codes::ALREADY_PROCESSED,
            codes::INVALID_SIGNATURE,
            codes::LEDGER_REJECTED,
            codes::TIMING_DEGRADED,
            codes::STORAGE_ERROR,
            codes::INTERNAL_ERROR,
        ];
        for code in expected {
            assert!(lookup(code).is_some(), "missing {}", code);
        }
        assert_eq!(all().len(), expected.len());
    }

    #[test]
    fn test_retryability() {
        assert!(is_retryable(codes::PROCESSING_FAILED));
        assert!(is_retryable(codes::LEDGER_TIMEOUT));
        assert!(!is_retryable(codes::INSUFFICIENT_FUNDS));
        assert!(!is_retryable("SOMETHING_ELSE"));
        assert_eq!(lookup(codes::PROCESSING_FAILED).unwrap().max_attempts, 3);
        assert!(suggested_retry_after(codes::VALIDATION_FAILED).is_none());
        assert_eq!(
            suggested_retry_after(codes::LEDGER_UNAVAILABLE),
            Some(Duration::from_millis(2_000))
        );
    }

    #[test]
    fn test_backoff_strategies() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        assert_eq!(calculate_backoff(base, 0, BackoffStrategy::Exponential, max), base);
        assert_eq!(
            calculate_backoff(base, 3, BackoffStrategy::Exponential, max),
            Duration::from_millis(800)
        );
        assert_eq!(calculate_backoff(base, 4, BackoffStrategy::Exponential, max), max);
        assert_eq!(
            calculate_backoff(base, 2, BackoffStrategy::Linear, max),
            Duration::from_millis(300)
        );
        assert_eq!(calculate_backoff(base, 7, BackoffStrategy::Constant, max), base);
    }

    #[test]
    fn test_backoff_saturates() {
        let max = Duration::from_secs(30);
        assert_eq!(
            calculate_backoff(Duration::from_secs(1), 200, BackoffStrategy::Exponential, max),
            max
        );
        assert_eq!(
            calculate_backoff(Duration::MAX, u32::MAX, BackoffStrategy::Linear, max),
            max
        );
    }

    #[test]
    fn test_policy_for_code() {
        let policy = RetryPolicy::for_code(codes::NETWORK_CONGESTION);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(5_000));
        assert_eq!(RetryPolicy::for_code(codes::LEDGER_REJECTED).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_base_delay(Duration::ZERO);

        let result: Result<u32, String> = with_retry(
            &policy,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_base_delay(Duration::ZERO);

        let result: Result<(), String> = with_retry(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent".to_string()) }
            },
            |e| e != "permanent",
        )
        .await;

        assert_eq!(result.unwrap_err(), "permanent");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::ZERO)
            .with_max_attempts(4);

        let result: Result<(), String> = with_retry(
            &policy,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            },
            |_| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
