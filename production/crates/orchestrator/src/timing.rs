//! Logical clock and synchronization reporting.
//!
//! The coordinator anchors a monotonic clock to the wall clock once at
//! startup. Timestamps are derived from the monotonic side so they never go
//! backwards and never repeat; the background refresh task compares the
//! wall clock against the logical clock and publishes the drift as a
//! `SyncStatus` through a watch channel.

use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kernel_types::{ClockSource, OperationId, PrecisionTier, SyncQuality};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Drift below which the clock counts as synchronized.
const SYNCHRONIZED_OFFSET_NS: u64 = 1_000_000;
/// Drift below which the clock counts as degraded rather than unsynchronized.
const DEGRADED_OFFSET_NS: u64 = 100_000_000;
/// Missed refreshes before reporting holdover.
const HOLDOVER_MISSED_REFRESHES: u32 = 3;
/// How long a certificate stays valid after issuance.
const CERTIFICATE_VALIDITY_SECS: i64 = 86_400;

const FINRA_CAT_613_NS: u64 = 50_000_000;
const FINRA_CAT_613_DEGRADED_NS: u64 = 100_000_000;
const MIFID_II_EXCEEDS_NS: u64 = 100_000;
const MIFID_II_RTS_25_NS: u64 = 1_000_000;
const MIFID_II_DEGRADED_NS: u64 = 10_000_000;

/// One logical timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampReading {
    pub timestamp: DateTime<Utc>,
    /// Nanoseconds since the coordinator's anchor; strictly increasing.
    pub counter_ns: u64,
    pub precision: PrecisionTier,
    pub clock_source: ClockSource,
    pub synchronized: bool,
}

/// Snapshot of clock synchronization
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncQuality,
    pub synchronized: bool,
    /// Wall clock minus logical clock.
    pub offset_ns: i64,
    pub jitter_ns: u64,
    pub last_sync: DateTime<Utc>,
    pub peer_count: u32,
    pub clock_source: ClockSource,
    pub precision: PrecisionTier,
}

/// Elapsed time between two instants
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMeasurement {
    pub elapsed_ms: u64,
    pub elapsed_ns: u64,
    pub human: String,
    /// Set when `end` was before `start` and the result was clamped to zero.
    pub clock_skew: bool,
}

/// Result of a unit of work with its measured duration
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub result: T,
    pub timing: LatencyMeasurement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    NonCompliant,
    Degraded,
    Compliant,
    Exceeds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceCheck {
    pub regulation: String,
    pub max_allowed_ns: u64,
    pub level: ComplianceLevel,
    pub compliant: bool,
}

/// Certificate attesting to an operation's timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampCertificate {
    pub certificate_id: String,
    pub operation_id: OperationId,
    pub timestamp: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub declared_accuracy_ns: u64,
    pub precision: PrecisionTier,
    pub clock_source: ClockSource,
    pub synchronized: bool,
    pub compliance: Vec<ComplianceCheck>,
}

/// Human-readable duration: ns, µs, ms, s or m.
pub fn format_duration_ns(ns: u64) -> String {
    let value = ns as f64;
    if ns < 1_000 {
        format!("{}ns", ns)
    } else if ns < 1_000_000 {
        format!("{:.2}µs", value / 1_000.0)
    } else if ns < 1_000_000_000 {
        format!("{:.2}ms", value / 1_000_000.0)
    } else if ns < 60_000_000_000 {
        format!("{:.2}s", value / 1_000_000_000.0)
    } else {
        format!("{:.2}m", value / 60_000_000_000.0)
    }
}

fn classify(offset_ns: i64) -> SyncQuality {
    let drift = offset_ns.unsigned_abs();
    if drift < SYNCHRONIZED_OFFSET_NS {
        SyncQuality::Synchronized
    } else if drift < DEGRADED_OFFSET_NS {
        SyncQuality::Degraded
    } else {
        SyncQuality::Unsynchronized
    }
}

fn finra_cat_613(accuracy_ns: u64, synchronized: bool) -> ComplianceCheck {
    let level = if !synchronized {
        ComplianceLevel::NonCompliant
    } else if accuracy_ns < FINRA_CAT_613_NS {
        ComplianceLevel::Compliant
    } else if accuracy_ns < FINRA_CAT_613_DEGRADED_NS {
        ComplianceLevel::Degraded
    } else {
        ComplianceLevel::NonCompliant
    };
    ComplianceCheck {
        regulation: "FINRA CAT 613".to_string(),
        max_allowed_ns: FINRA_CAT_613_NS,
        compliant: matches!(level, ComplianceLevel::Compliant | ComplianceLevel::Exceeds),
        level,
    }
}

fn mifid_ii_rts_25(accuracy_ns: u64, synchronized: bool) -> ComplianceCheck {
    let level = if !synchronized {
        ComplianceLevel::NonCompliant
    } else if accuracy_ns < MIFID_II_EXCEEDS_NS {
        ComplianceLevel::Exceeds
    } else if accuracy_ns <= MIFID_II_RTS_25_NS {
        ComplianceLevel::Compliant
    } else if accuracy_ns < MIFID_II_DEGRADED_NS {
        ComplianceLevel::Degraded
    } else {
        ComplianceLevel::NonCompliant
    };
    ComplianceCheck {
        regulation: "MiFID II RTS 25".to_string(),
        max_allowed_ns: MIFID_II_RTS_25_NS,
        compliant: matches!(level, ComplianceLevel::Compliant | ComplianceLevel::Exceeds),
        level,
    }
}

/// Logical timing service.
pub struct TimingCoordinator {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
    last_counter: AtomicU64,
    precision: PrecisionTier,
    refresh_interval: Duration,
    status_tx: watch::Sender<SyncStatus>,
    shutdown: Arc<RwLock<bool>>,
}

impl TimingCoordinator {
    pub fn new(refresh_interval: Duration) -> Self {
        Self::with_precision(refresh_interval, PrecisionTier::Microsecond)
    }

    pub fn with_precision(refresh_interval: Duration, precision: PrecisionTier) -> Self {
        let anchor_wall = Utc::now();
        let (status_tx, _) = watch::channel(SyncStatus {
            status: SyncQuality::Synchronized,
            synchronized: true,
            offset_ns: 0,
            jitter_ns: 0,
            last_sync: anchor_wall,
            peer_count: 0,
            clock_source: ClockSource::LogicalMonotonic,
            precision,
        });

        Self {
            anchor_wall,
            anchor_instant: Instant::now(),
            last_counter: AtomicU64::new(0),
            precision,
            refresh_interval,
            status_tx,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the synchronization refresh task in the background
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            info!("Timing coordinator started");

            match self.run().await {
                Ok(()) => {
                    info!("Timing coordinator stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("Timing coordinator error: {}", e);
                    Err(e)
                }
            }
        })
    }

    async fn run(&self) -> Result<()> {
        let mut interval = interval(self.refresh_interval);

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping timing coordinator");
                return Ok(());
            }

            interval.tick().await;
            self.refresh();
        }
    }

    /// Re-measure drift between the wall clock and the logical clock and
    /// publish the result.
    pub fn refresh(&self) -> SyncStatus {
        let now = Utc::now();
        let logical = self.logical_now();
        let offset_ns = (now - logical)
            .num_nanoseconds()
            .unwrap_or(i64::MAX);

        let previous = self.status_tx.borrow().clone();
        let jitter_ns = offset_ns.abs_diff(previous.offset_ns);

        let since_last = (now - previous.last_sync).to_std().unwrap_or_default();
        let missed = self
            .refresh_interval
            .checked_mul(HOLDOVER_MISSED_REFRESHES)
            .map(|limit| !self.refresh_interval.is_zero() && since_last > limit)
            .unwrap_or(false);

        let mut quality = classify(offset_ns);
        if missed && quality == SyncQuality::Synchronized {
            quality = SyncQuality::Holdover;
        }

        if quality != previous.status {
            match quality {
                SyncQuality::Synchronized => info!("Clock synchronized (offset {}ns)", offset_ns),
                _ => warn!(
                    "Clock synchronization {} (offset {}ns, jitter {}ns)",
                    quality, offset_ns, jitter_ns
                ),
            }
        } else {
            debug!("Clock offset {}ns, jitter {}ns", offset_ns, jitter_ns);
        }

        let status = SyncStatus {
            status: quality,
            synchronized: quality == SyncQuality::Synchronized,
            offset_ns,
            jitter_ns,
            last_sync: now,
            peer_count: 0,
            clock_source: ClockSource::LogicalMonotonic,
            precision: self.precision,
        };
        self.status_tx.send_replace(status.clone());
        status
    }

    fn logical_now(&self) -> DateTime<Utc> {
        let elapsed = self.anchor_instant.elapsed();
        self.anchor_wall
            + ChronoDuration::from_std(elapsed).unwrap_or_else(|_| ChronoDuration::zero())
    }

    /// Strictly increasing logical timestamp.
    pub fn get_timestamp(&self) -> TimestampReading {
        let candidate = u64::try_from(self.anchor_instant.elapsed().as_nanos()).unwrap_or(u64::MAX);

        let mut last = self.last_counter.load(Ordering::SeqCst);
        let counter_ns = loop {
            let next = candidate.max(last.saturating_add(1));
            match self.last_counter.compare_exchange_weak(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break next,
                Err(actual) => last = actual,
            }
        };

        let offset = ChronoDuration::nanoseconds(counter_ns.min(i64::MAX as u64) as i64);
        TimestampReading {
            timestamp: self.anchor_wall + offset,
            counter_ns,
            precision: self.precision,
            clock_source: ClockSource::LogicalMonotonic,
            synchronized: self.status_tx.borrow().synchronized,
        }
    }

    /// Convenience for callers that only need the instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.get_timestamp().timestamp
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn precision(&self) -> PrecisionTier {
        self.precision
    }

    /// Elapsed time from `start` to `end` (default: now). A negative span
    /// is clamped to zero and flagged as clock skew.
    pub fn calculate_latency(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> LatencyMeasurement {
        let end = end.unwrap_or_else(|| self.now());
        let raw_ns = (end - start).num_nanoseconds().unwrap_or(i64::MAX);

        let (elapsed_ns, clock_skew) = if raw_ns < 0 {
            warn!(
                "Clock skew detected: end {} precedes start {} by {}ns",
                end,
                start,
                raw_ns.unsigned_abs()
            );
            (0, true)
        } else {
            (raw_ns as u64, false)
        };

        LatencyMeasurement {
            elapsed_ms: elapsed_ns / 1_000_000,
            elapsed_ns,
            human: format_duration_ns(elapsed_ns),
            clock_skew,
        }
    }

    /// Await `work` and report how long it took, whatever the outcome.
    pub async fn measure_operation_timing<F, T>(&self, work: F) -> Timed<T>
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let result = work.await;
        let elapsed_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);

        Timed {
            result,
            timing: LatencyMeasurement {
                elapsed_ms: elapsed_ns / 1_000_000,
                elapsed_ns,
                human: format_duration_ns(elapsed_ns),
                clock_skew: false,
            },
        }
    }

    /// Issue a certificate for `timestamp` on behalf of `operation_id`.
    pub fn certify_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        operation_id: OperationId,
    ) -> TimestampCertificate {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true).as_bytes());
        hasher.update(b"|");
        hasher.update(operation_id.to_string().as_bytes());
        let certificate_id = hex::encode(hasher.finalize());

        let synchronized = self.status_tx.borrow().synchronized;
        let accuracy_ns = self.precision.declared_accuracy_ns();
        let issued_at = Utc::now();

        TimestampCertificate {
            certificate_id,
            operation_id,
            timestamp,
            issued_at,
            valid_from: timestamp,
            valid_until: issued_at + ChronoDuration::seconds(CERTIFICATE_VALIDITY_SECS),
            declared_accuracy_ns: accuracy_ns,
            precision: self.precision,
            clock_source: ClockSource::LogicalMonotonic,
            synchronized,
            compliance: vec![
                finra_cat_613(accuracy_ns, synchronized),
                mifid_ii_rts_25(accuracy_ns, synchronized),
            ],
        }
    }

    /// Stop the refresh task
    pub async fn shutdown(&self) {
        info!("Initiating timing coordinator shutdown");
        *self.shutdown.write().await = true;
    }
}

impl Default for TimingCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
