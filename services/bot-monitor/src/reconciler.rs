//! Lifecycle reconciliation - keep the local registry in step with the
//! control plane and notify recipients about what their bots are doing

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::ControlPlane;
use crate::clock::{Clock, SystemClock};
use crate::error::{MonitorError, Result};
use crate::log_classifier::{classify_stop_reason, parse_log_hints};
use crate::notifier::{Notification, Notifier};
use crate::observability::{bot_event, metrics, MetricsCollector};
use crate::registry::RegistryStore;
use crate::throttle::HeartbeatThrottle;
use crate::trade_events::TradeEventExtractor;
use crate::types::{
    PerformanceSummary, RemoteBotSnapshot, RemotePhase, StopReason, TrackedBotRecord,
};

/// What happened to one record during a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Still tracked
    Keep,
    /// Not in this cycle's snapshots; left untouched
    Skipped,
    /// Trade completed; archived and dropped from the registry
    Archived,
    /// Gone from the control plane; archived and dropped from the registry
    Removed,
}

impl Disposition {
    pub fn retains_record(&self) -> bool {
        matches!(self, Disposition::Keep | Disposition::Skipped)
    }
}

#[derive(Debug)]
pub struct RecordOutcome {
    pub instance_name: String,
    pub result: Result<Disposition>,
}

/// Result of one `process_batch` call
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
    /// Working set persisted at the end of the batch
    pub records: Vec<TrackedBotRecord>,
}

impl BatchReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, Ok(d) if d == disposition))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err()).count()
    }
}

/// Retry policy for the post-completion performance lookup
#[derive(Debug, Clone, Copy)]
struct FinalPnlLookup {
    attempts: u32,
    retry: Duration,
}

/// Owns the registry, dedup sets and heartbeat throttle; one pass at a time
pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    store: RegistryStore,
    extractor: TradeEventExtractor,
    throttle: HeartbeatThrottle,
    default_recipient: String,
    final_pnl: Option<FinalPnlLookup>,
    metrics: MetricsCollector,
    /// Working set carried between cycles; read from the store only at start
    records: Option<Vec<TrackedBotRecord>>,
}

impl Reconciler {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        notifier: Arc<dyn Notifier>,
        store: RegistryStore,
        default_recipient: &str,
    ) -> Self {
        Self {
            control_plane,
            notifier,
            clock: Arc::new(SystemClock),
            store,
            extractor: TradeEventExtractor::new(),
            throttle: HeartbeatThrottle::default(),
            default_recipient: default_recipient.to_string(),
            final_pnl: None,
            metrics: MetricsCollector::new(),
            records: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_heartbeat_cooldown(mut self, cooldown: chrono::Duration) -> Self {
        self.throttle = HeartbeatThrottle::new(cooldown);
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.extractor = TradeEventExtractor::with_capacity(capacity);
        self
    }

    /// Attach the archived performance summary to completion notices
    pub fn with_final_pnl(mut self, attempts: u32, retry: Duration) -> Self {
        self.final_pnl = Some(FinalPnlLookup {
            attempts: attempts.max(1),
            retry,
        });
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    /// One full pass: synchronize, process, persist
    pub async fn run_cycle(&mut self) -> BatchReport {
        let (records, snapshots) = self.synchronize().await;
        let report = self.process_batch(records, &snapshots).await;
        self.record_cycle(&report).await;
        report
    }

    /// Count a finished pass and log its summary
    pub async fn record_cycle(&self, report: &BatchReport) {
        self.metrics.increment(metrics::CYCLES, 1).await;
        info!(
            "Cycle complete: {} tracked, {} archived, {} removed, {} failed",
            report.records.len(),
            report.count(Disposition::Archived),
            report.count(Disposition::Removed),
            report.failures()
        );
    }

    /// Pull the remote status map and bring the registry in line with it.
    ///
    /// New remote instances are admitted. When the fetch succeeded, local
    /// records the control plane no longer reports are dropped without an
    /// archive call. A failed fetch counts as an empty map and changes nothing.
    /// The store is read on the first call only; later calls continue from
    /// the in-memory working set, so a failed save never rolls it back.
    pub async fn synchronize(
        &mut self,
    ) -> (Vec<TrackedBotRecord>, HashMap<String, RemoteBotSnapshot>) {
        let (snapshots, fetched) = match self.control_plane.get_all_statuses().await {
            Ok(snapshots) => (snapshots, true),
            Err(e) => {
                warn!("Failed to fetch bot statuses: {}", e);
                self.metrics.increment(metrics::STATUS_FETCH_FAILED, 1).await;
                (HashMap::new(), false)
            }
        };

        let mut records = match self.records.take() {
            Some(records) => records,
            None => self.store.load().await,
        };

        if fetched {
            let mut vanished = Vec::new();
            records.retain(|record| {
                let present = snapshots.contains_key(&record.instance_name);
                if !present {
                    vanished.push(record.instance_name.clone());
                }
                present
            });
            for instance_name in vanished {
                self.forget(&instance_name);
                bot_event(&instance_name, "untracked", "no longer reported by control plane");
                self.metrics.increment(metrics::BOT_REMOVED, 1).await;
            }
        }

        let known: HashSet<String> = records.iter().map(|r| r.instance_name.clone()).collect();
        let mut new_names: Vec<&String> = snapshots
            .keys()
            .filter(|name| !known.contains(*name))
            .collect();
        new_names.sort();

        for instance_name in new_names {
            let record = match self.control_plane.get_bot_detail(instance_name).await {
                Ok(detail) => {
                    TrackedBotRecord::from_detail(instance_name, &self.default_recipient, detail)
                }
                Err(e) => {
                    warn!(instance = %instance_name, "Detail lookup failed, tracking with placeholder: {}", e);
                    TrackedBotRecord::placeholder(instance_name, &self.default_recipient)
                }
            };
            bot_event(instance_name, "admitted", &record.trading_pair);
            self.metrics.increment(metrics::BOT_ADMITTED, 1).await;
            records.push(record);
        }

        self.persist(&records).await;
        self.records = Some(records.clone());
        (records, snapshots)
    }

    /// Process each record against its snapshot and persist the survivors.
    ///
    /// A failing record is kept and its recipient gets an error notice; the
    /// rest of the batch is unaffected.
    pub async fn process_batch(
        &mut self,
        records: Vec<TrackedBotRecord>,
        snapshots: &HashMap<String, RemoteBotSnapshot>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for record in records {
            let result = match snapshots.get(&record.instance_name) {
                Some(snapshot) => self.process_record(&record, snapshot).await,
                None => {
                    debug!(instance = %record.instance_name, "No snapshot this cycle, skipping");
                    Ok(Disposition::Skipped)
                }
            };

            match &result {
                Ok(disposition) if disposition.retains_record() => report.records.push(record.clone()),
                Ok(_) => self.forget(&record.instance_name),
                Err(e) => {
                    error!(instance = %record.instance_name, "Failed to process bot: {}", e);
                    self.metrics.increment(metrics::RECORD_FAILED, 1).await;
                    let notice = Notification::Error {
                        message: format!("Failed to process bot {}: {}", record.instance_name, e),
                    };
                    self.send_best_effort(&record.recipient_id, &notice).await;
                    report.records.push(record.clone());
                }
            }

            report.outcomes.push(RecordOutcome {
                instance_name: record.instance_name,
                result,
            });
        }

        self.persist(&report.records).await;
        self.records = Some(report.records.clone());
        report
    }

    async fn process_record(
        &mut self,
        record: &TrackedBotRecord,
        snapshot: &RemoteBotSnapshot,
    ) -> Result<Disposition> {
        let instance_name = record.instance_name.as_str();

        // Keys are already marked seen, so every fresh fill gets its one send
        let mut trade_failure: Option<MonitorError> = None;
        for event in self.extractor.extract_new(instance_name, &snapshot.general_logs) {
            info!(instance = %instance_name, side = %event.side, price = %event.price, "New fill");
            match self
                .notifier
                .notify(&record.recipient_id, &Notification::TradeUpdate(event))
                .await
            {
                Ok(()) => self.metrics.increment(metrics::TRADE_NOTIFIED, 1).await,
                Err(e) => {
                    warn!(instance = %instance_name, "Trade notification failed: {}", e);
                    trade_failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = trade_failure {
            return Err(e);
        }

        match &snapshot.phase {
            RemotePhase::Running => {
                let now = self.clock.now();
                if self.throttle.is_due(instance_name, now) {
                    let notice = self.status_notice(record, snapshot, None, None);
                    self.notifier.notify(&record.recipient_id, &notice).await?;
                    self.throttle.record_sent(instance_name, now);
                    self.metrics.increment(metrics::HEARTBEAT_SENT, 1).await;
                } else {
                    debug!(instance = %instance_name, "Heartbeat throttled");
                }
                Ok(Disposition::Keep)
            }
            RemotePhase::Stopped | RemotePhase::Success => {
                self.throttle.reset(instance_name);
                let reason = classify_stop_reason(&snapshot.general_logs, &snapshot.error_logs);
                info!(instance = %instance_name, phase = %snapshot.phase, "Bot stopped: {}", reason);

                if !reason.is_terminal() {
                    let notice = self.status_notice(record, snapshot, Some(reason), None);
                    self.notifier.notify(&record.recipient_id, &notice).await?;
                    return Ok(Disposition::Keep);
                }

                self.archive(instance_name).await;
                let final_pnl = self.final_performance(instance_name).await;
                let notice = self.status_notice(record, snapshot, Some(reason), final_pnl);
                self.send_best_effort(&record.recipient_id, &notice).await;
                bot_event(instance_name, "archived", "trade completed");
                self.metrics.increment(metrics::BOT_ARCHIVED, 1).await;
                Ok(Disposition::Archived)
            }
            RemotePhase::NotFound => {
                self.throttle.reset(instance_name);
                self.archive(instance_name).await;
                let notice = Notification::NotFoundAlert {
                    instance_name: instance_name.to_string(),
                    trading_pair: record.trading_pair.clone(),
                };
                self.send_best_effort(&record.recipient_id, &notice).await;
                bot_event(instance_name, "removed", "not found on control plane");
                self.metrics.increment(metrics::BOT_REMOVED, 1).await;
                Ok(Disposition::Removed)
            }
            RemotePhase::Other(raw) => {
                warn!(instance = %instance_name, phase = %raw, "Unrecognised phase, keeping bot");
                self.metrics.increment(metrics::UNKNOWN_PHASE, 1).await;
                Ok(Disposition::Keep)
            }
        }
    }

    fn status_notice(
        &self,
        record: &TrackedBotRecord,
        snapshot: &RemoteBotSnapshot,
        stop_reason: Option<StopReason>,
        final_pnl: Option<PerformanceSummary>,
    ) -> Notification {
        let hints = match snapshot.phase {
            RemotePhase::Running => Some(parse_log_hints(&snapshot.general_logs)),
            _ => None,
        };
        Notification::StatusUpdate {
            instance_name: record.instance_name.clone(),
            trading_pair: record.trading_pair.clone(),
            phase: snapshot.phase.clone(),
            stop_reason,
            hints,
            final_pnl,
        }
    }

    /// Archive failures never block removal
    async fn archive(&self, instance_name: &str) {
        if let Err(e) = self.control_plane.archive_bot(instance_name).await {
            warn!(instance = %instance_name, "Archive failed, removing anyway: {}", e);
            self.metrics.increment(metrics::ARCHIVE_FAILED, 1).await;
        }
    }

    async fn send_best_effort(&self, recipient_id: &str, notification: &Notification) {
        if let Err(e) = self.notifier.notify(recipient_id, notification).await {
            warn!(recipient = %recipient_id, kind = notification.kind(), "Notification failed: {}", e);
            self.metrics.increment(metrics::NOTIFY_FAILED, 1).await;
        }
    }

    /// Find the archived database of a completed bot and read its summary.
    /// The archive may take a while to appear, hence the retries.
    async fn final_performance(&self, instance_name: &str) -> Option<PerformanceSummary> {
        let lookup = self.final_pnl?;
        let marker = format!("bots/archived/{}/data/config_", instance_name);

        for attempt in 1..=lookup.attempts {
            match self.control_plane.list_archived_databases().await {
                Ok(databases) => {
                    let found = databases
                        .iter()
                        .find(|path| path.contains(&marker) && path.ends_with(".sqlite"));
                    if let Some(db_path) = found {
                        match self.control_plane.get_database_performance(db_path).await {
                            Ok(summary) => return Some(summary),
                            Err(e) => {
                                warn!(instance = %instance_name, "Performance lookup failed: {}", e)
                            }
                        }
                    } else {
                        debug!(instance = %instance_name, attempt, "Archived database not listed yet");
                    }
                }
                Err(e) => warn!(instance = %instance_name, "Listing archived databases failed: {}", e),
            }

            if attempt < lookup.attempts {
                tokio::time::sleep(lookup.retry).await;
            }
        }

        warn!(instance = %instance_name, "No final PnL after {} attempts", lookup.attempts);
        None
    }

    fn forget(&mut self, instance_name: &str) {
        self.extractor.forget(instance_name);
        self.throttle.reset(instance_name);
    }

    async fn persist(&self, records: &[TrackedBotRecord]) {
        if let Err(e) = self.store.save(records).await {
            warn!("Failed to save registry: {}", e);
            self.metrics.increment(metrics::SAVE_FAILED, 1).await;
        }
    }
}
