//! Observability: in-process counters and structured lifecycle events

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Counter collector shared by the reconciler and the loop
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    counters: BTreeMap<String, u64>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner {
                counters: BTreeMap::new(),
                start_time: Instant::now(),
            })),
        }
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str, value: u64) {
        let mut inner = self.inner.write().await;
        *inner.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        MetricsSnapshot {
            counters: inner.counters.clone(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.counters.get(name).copied().unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub uptime_secs: u64,
}

/// Log a bot lifecycle event with consistent fields
pub fn bot_event(instance_name: &str, event_type: &str, details: &str) {
    tracing::info!(
        instance = %instance_name,
        event_type = %event_type,
        details = %details,
        "bot_event"
    );
}

/// Predefined metric names
pub mod metrics {
    // Cycles
    pub const CYCLES: &str = "reconcile_cycles_total";
    pub const STATUS_FETCH_FAILED: &str = "status_fetch_failed_total";
    pub const SAVE_FAILED: &str = "registry_save_failed_total";

    // Bot lifecycle
    pub const BOT_ADMITTED: &str = "bot_admitted_total";
    pub const BOT_ARCHIVED: &str = "bot_archived_total";
    pub const BOT_REMOVED: &str = "bot_removed_total";
    pub const ARCHIVE_FAILED: &str = "archive_failed_total";

    // Notifications
    pub const TRADE_NOTIFIED: &str = "trade_notified_total";
    pub const HEARTBEAT_SENT: &str = "heartbeat_sent_total";
    pub const NOTIFY_FAILED: &str = "notify_failed_total";

    // Per-record processing
    pub const RECORD_FAILED: &str = "record_failed_total";
    pub const UNKNOWN_PHASE: &str = "unknown_phase_total";
}
