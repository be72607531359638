//! Configuration for the orchestration service

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestration service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Capacity of the pipeline work queue
    pub queue_capacity: usize,

    /// Maximum number of pipelines running at once
    pub max_concurrent_ops: usize,

    /// TTL applied when a request does not carry one
    pub default_ttl_secs: u64,

    /// Largest TTL a request may ask for
    pub max_ttl_secs: u64,

    /// Fixed part of the completion estimate
    pub base_completion_estimate_ms: u64,

    /// Completion estimate added per ledger target
    pub per_target_estimate_ms: u64,

    /// Timeout for the witness call
    pub witness_timeout: Duration,

    /// Timeout for the settlement call
    pub settlement_timeout: Duration,

    /// Timeout for the contract call
    pub contract_timeout: Duration,

    /// Artificial delay after entering `processing`
    pub processing_delay: Duration,

    /// Interval between TTL sweeps
    pub ttl_sweep_interval: Duration,

    /// Interval between clock synchronization refreshes
    pub sync_refresh_interval: Duration,

    /// Path prefix used to build tracking URLs
    pub tracking_base_path: String,

    /// Settlement destination when the payment context names none
    pub default_settlement_destination: String,

    /// Protocol version stamped on metadata records
    pub protocol_version: String,

    /// Application invoked on the contract ledger
    pub contract_app_id: u64,

    /// Method invoked on the contract ledger
    pub contract_method: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_concurrent_ops: 10,
            default_ttl_secs: 3600,
            max_ttl_secs: 86_400,
            base_completion_estimate_ms: 2_000,
            per_target_estimate_ms: 1_500,
            witness_timeout: Duration::from_secs(30),
            settlement_timeout: Duration::from_secs(30),
            contract_timeout: Duration::from_secs(30),
            processing_delay: Duration::ZERO,
            ttl_sweep_interval: Duration::from_secs(30),
            sync_refresh_interval: Duration::from_secs(1),
            tracking_base_path: "/api/v1/operations".to_string(),
            default_settlement_destination: "kernel-settlement-pool".to_string(),
            protocol_version: "1.0".to_string(),
            contract_app_id: 0,
            contract_method: "record_operation".to_string(),
        }
    }
}

/// Builder for OrchestrationConfig
pub struct OrchestrationConfigBuilder {
    config: OrchestrationConfig,
}

impl OrchestrationConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestrationConfig::default(),
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn max_concurrent_ops(mut self, max_ops: usize) -> Self {
        self.config.max_concurrent_ops = max_ops;
        self
    }

    pub fn default_ttl_secs(mut self, ttl: u64) -> Self {
        self.config.default_ttl_secs = ttl;
        self
    }

    pub fn max_ttl_secs(mut self, ttl: u64) -> Self {
        self.config.max_ttl_secs = ttl;
        self
    }

    pub fn completion_estimate(mut self, base_ms: u64, per_target_ms: u64) -> Self {
        self.config.base_completion_estimate_ms = base_ms;
        self.config.per_target_estimate_ms = per_target_ms;
        self
    }

    pub fn witness_timeout(mut self, timeout: Duration) -> Self {
        self.config.witness_timeout = timeout;
        self
    }

    pub fn settlement_timeout(mut self, timeout: Duration) -> Self {
        self.config.settlement_timeout = timeout;
        self
    }

    pub fn contract_timeout(mut self, timeout: Duration) -> Self {
        self.config.contract_timeout = timeout;
        self
    }

    pub fn processing_delay(mut self, delay: Duration) -> Self {
        self.config.processing_delay = delay;
        self
    }

    pub fn ttl_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.ttl_sweep_interval = interval;
        self
    }

    pub fn sync_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.sync_refresh_interval = interval;
        self
    }

    pub fn tracking_base_path(mut self, path: impl Into<String>) -> Self {
        self.config.tracking_base_path = path.into();
        self
    }

    pub fn default_settlement_destination(mut self, destination: impl Into<String>) -> Self {
        self.config.default_settlement_destination = destination.into();
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.config.protocol_version = version.into();
        self
    }

    pub fn contract(mut self, app_id: u64, method: impl Into<String>) -> Self {
        self.config.contract_app_id = app_id;
        self.config.contract_method = method.into();
        self
    }

    pub fn build(self) -> OrchestrationConfig {
        self.config
    }
}

impl Default for OrchestrationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
