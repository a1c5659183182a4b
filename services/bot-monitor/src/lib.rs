//! Bot Monitor Library
//!
//! Lifecycle reconciliation for trading bots running on a Hummingbot
//! control plane.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod log_classifier;
pub mod notifier;
pub mod observability;
pub mod reconciler;
pub mod registry;
pub mod runner;
pub mod throttle;
pub mod trade_events;
pub mod types;

// Re-export main types for convenience
pub use client::{ControlPlane, ControlPlaneClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use notifier::{Notification, Notifier, TelegramNotifier};
pub use observability::{MetricsCollector, MetricsSnapshot};
pub use reconciler::{BatchReport, Disposition, Reconciler, RecordOutcome};
pub use registry::RegistryStore;
pub use runner::MonitorRunner;
pub use types::{
    BotDetail, LogHints, LogLine, PerformanceSummary, RemoteBotSnapshot, RemotePhase, StopReason,
    TrackedBotRecord, TradeEvent, TradeSide,
};
