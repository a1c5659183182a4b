//! Monitor Runner - drives reconciliation on a fixed interval

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::observability::MetricsSnapshot;
use crate::reconciler::Reconciler;

/// Scheduler loop around a [`Reconciler`]
pub struct MonitorRunner {
    reconciler: Reconciler,
    check_interval: Duration,
    cancel: CancellationToken,
}

impl MonitorRunner {
    pub fn new(reconciler: Reconciler, check_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            reconciler,
            check_interval,
            cancel,
        }
    }

    /// Run until cancelled. Cancellation is checked between steps, so an
    /// in-flight synchronize or batch always completes.
    pub async fn run(mut self) -> MetricsSnapshot {
        info!(
            "Bot monitor started, checking every {}s",
            self.check_interval.as_secs_f64()
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let (records, snapshots) = self.reconciler.synchronize().await;

            if self.cancel.is_cancelled() {
                break;
            }
            let report = self.reconciler.process_batch(records, &snapshots).await;
            self.reconciler.record_cycle(&report).await;
            debug!("Metrics: {:?}", self.reconciler.metrics().snapshot().await);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }

        info!("Shutdown requested, releasing control plane connection");
        self.reconciler.control_plane().close().await;

        let snapshot = self.reconciler.metrics().snapshot().await;
        info!("Final metrics: {:?}", snapshot);
        snapshot
    }
}
