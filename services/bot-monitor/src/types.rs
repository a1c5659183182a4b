//! Core types shared by the monitor
//!
//! These types define the contract between the reconciler, the control-plane
//! gateway and the notification gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Placeholder pair used when a bot's detail lookup fails
pub const UNKNOWN_PAIR: &str = "UNKNOWN";

/// A bot tracked in the local registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBotRecord {
    /// Control-plane instance name (unique key)
    pub instance_name: String,
    /// Chat that receives this bot's notifications
    #[serde(alias = "chat_id")]
    pub recipient_id: String,
    pub trading_pair: String,
    pub order_amount_usd: Decimal,
    pub trailing_stop_loss_delta: Decimal,
    pub take_profit_delta: Decimal,
    pub fixed_stop_loss_delta: Decimal,
}

impl TrackedBotRecord {
    /// Build a record from a control-plane detail lookup
    pub fn from_detail(instance_name: &str, recipient_id: &str, detail: BotDetail) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            recipient_id: recipient_id.to_string(),
            trading_pair: detail.trading_pair,
            order_amount_usd: detail.order_amount_usd,
            trailing_stop_loss_delta: detail.trailing_stop_loss_delta,
            take_profit_delta: detail.take_profit_delta,
            fixed_stop_loss_delta: detail.fixed_stop_loss_delta,
        }
    }

    /// Record with default fields, used when the detail lookup failed
    pub fn placeholder(instance_name: &str, recipient_id: &str) -> Self {
        Self::from_detail(instance_name, recipient_id, BotDetail::default())
    }
}

/// Bot configuration as reported by the control plane's per-bot lookup
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BotDetail {
    #[serde(default = "unknown_pair")]
    pub trading_pair: String,
    #[serde(default)]
    pub order_amount_usd: Decimal,
    #[serde(default)]
    pub trailing_stop_loss_delta: Decimal,
    #[serde(default)]
    pub take_profit_delta: Decimal,
    #[serde(default)]
    pub fixed_stop_loss_delta: Decimal,
}

impl Default for BotDetail {
    fn default() -> Self {
        Self {
            trading_pair: unknown_pair(),
            order_amount_usd: Decimal::ZERO,
            trailing_stop_loss_delta: Decimal::ZERO,
            take_profit_delta: Decimal::ZERO,
            fixed_stop_loss_delta: Decimal::ZERO,
        }
    }
}

fn unknown_pair() -> String {
    UNKNOWN_PAIR.to_string()
}

/// Phase reported by the control plane for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePhase {
    Running,
    Stopped,
    Success,
    NotFound,
    Other(String),
}

impl RemotePhase {
    pub fn as_str(&self) -> &str {
        match self {
            RemotePhase::Running => "running",
            RemotePhase::Stopped => "stopped",
            RemotePhase::Success => "success",
            RemotePhase::NotFound => "not_found",
            RemotePhase::Other(raw) => raw,
        }
    }
}

impl Default for RemotePhase {
    fn default() -> Self {
        RemotePhase::Other(String::new())
    }
}

impl From<&str> for RemotePhase {
    fn from(raw: &str) -> Self {
        match raw {
            "running" => RemotePhase::Running,
            "stopped" => RemotePhase::Stopped,
            "success" => RemotePhase::Success,
            "not_found" => RemotePhase::NotFound,
            other => RemotePhase::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RemotePhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .map(RemotePhase::from)
            .unwrap_or_default())
    }
}

impl fmt::Display for RemotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bot log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub msg: String,
    /// Source timestamp, kept verbatim
    pub timestamp: String,
}

impl LogLine {
    pub fn new(msg: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Lenient conversion from a raw log entry; unusable entries yield `None`
    fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(msg) => Some(LogLine::new(msg, "")),
            serde_json::Value::Object(mut fields) => {
                let msg = match fields.remove("msg")? {
                    serde_json::Value::String(msg) => msg,
                    _ => return None,
                };
                let timestamp = match fields.remove("timestamp") {
                    Some(serde_json::Value::String(ts)) => ts,
                    Some(serde_json::Value::Number(ts)) => ts.to_string(),
                    _ => String::new(),
                };
                Some(LogLine { msg, timestamp })
            }
            _ => None,
        }
    }
}

/// Deserialize a log array, dropping malformed entries
fn lenient_log_lines<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<LogLine>, D::Error> {
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(LogLine::from_value)
        .collect())
}

/// Per-cycle status of one instance as reported by the control plane
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteBotSnapshot {
    /// Filled from the status map key
    #[serde(skip)]
    pub instance_name: String,
    #[serde(rename = "status", default)]
    pub phase: RemotePhase,
    #[serde(default, deserialize_with = "lenient_log_lines")]
    pub general_logs: Vec<LogLine>,
    #[serde(default, deserialize_with = "lenient_log_lines")]
    pub error_logs: Vec<LogLine>,
}

impl RemoteBotSnapshot {
    pub fn new(instance_name: &str, phase: RemotePhase) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            phase,
            general_logs: Vec::new(),
            error_logs: Vec::new(),
        }
    }

    pub fn with_general_logs(mut self, logs: Vec<LogLine>) -> Self {
        self.general_logs = logs;
        self
    }

    pub fn with_error_logs(mut self, logs: Vec<LogLine>) -> Self {
        self.error_logs = logs;
        self
    }
}

/// Fill side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fill parsed from a bot's general log
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub instance_name: String,
    pub trading_pair: String,
    pub side: TradeSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub source_timestamp: String,
}

/// Why a bot stopped, derived from its logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TradeCompleted,
    ManualStop,
    Error(String),
    Unknown,
}

impl StopReason {
    /// Only a completed trade archives the bot permanently
    pub fn is_terminal(&self) -> bool {
        matches!(self, StopReason::TradeCompleted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TradeCompleted => f.write_str("Trade Completed"),
            StopReason::ManualStop => f.write_str("Manual Stop/Strategy Stopped"),
            StopReason::Error(line) => write!(f, "Error: {}", line),
            StopReason::Unknown => f.write_str("Unknown Reason"),
        }
    }
}

/// PnL and open-order hints parsed from a running bot's log tail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHints {
    pub pnl_info: String,
    pub open_orders_info: String,
}

impl Default for LogHints {
    fn default() -> Self {
        Self {
            pnl_info: "PnL: N/A".to_string(),
            open_orders_info: "Open Orders: N/A".to_string(),
        }
    }
}

/// Performance summary of an archived bot database
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PerformanceSummary {
    #[serde(default)]
    pub final_net_pnl_quote: Option<serde_json::Value>,
    #[serde(default)]
    pub total_volume_quote: Option<serde_json::Value>,
    #[serde(default)]
    pub total_fees_quote: Option<serde_json::Value>,
}
