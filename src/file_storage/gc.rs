//! # Garbage Collector
//!
//! Periodically reclaims deletion candidates older than the retention
//! window. One failing key is logged and left for the next sweep; it never
//! stops the rest of the sweep.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::adapter::LocalSignedAdapter;
use super::errors::StorageResult;

/// Default retention window: 24 hours
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;
/// Default sweep interval: 10 minutes
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 10 * 60;

/// Outcome of one sweep across all adapters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub not_expired: usize,
    pub failed: usize,
}

impl SweepReport {
    fn merge(&mut self, other: &SweepReport) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.not_expired += other.not_expired;
        self.failed += other.failed;
    }
}

/// Background sweeper over a fixed set of adapters
#[derive(Debug)]
pub struct GarbageCollector {
    adapters: Vec<Arc<LocalSignedAdapter>>,
    retention: Duration,
    interval: StdDuration,
}

impl GarbageCollector {
    pub fn new(adapters: Vec<Arc<LocalSignedAdapter>>, retention: Duration, interval: StdDuration) -> Self {
        Self {
            adapters,
            retention,
            interval,
        }
    }

    /// One pass over every adapter's deletion candidates
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for adapter in &self.adapters {
            match self.sweep_adapter(adapter).await {
                Ok(partial) => report.merge(&partial),
                Err(err) => {
                    error!(base_path = adapter.base_path(), error = %err, "cannot list deletion candidates");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            not_expired = report.not_expired,
            failed = report.failed,
            "sweep complete"
        );
        report
    }

    async fn sweep_adapter(&self, adapter: &LocalSignedAdapter) -> StorageResult<SweepReport> {
        let mut report = SweepReport::default();

        for candidate in adapter.tracker().list_candidates()? {
            report.scanned += 1;

            if !adapter.is_expired(candidate.created_at, self.retention) {
                report.not_expired += 1;
                continue;
            }

            match adapter.reclaim(&candidate.key).await {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(
                        base_path = adapter.base_path(),
                        key = %candidate.key,
                        error = %err,
                        "failed to reclaim object, will retry next sweep"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweep every interval until `shutdown` changes or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            retention_secs = self.retention.num_seconds(),
            "starting garbage collector"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    info!("garbage collector shutting down");
                    break;
                }
            }
        }
    }
}
