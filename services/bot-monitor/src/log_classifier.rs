//! Log classification - derive stop reasons and status hints from bot logs
//!
//! Logs arrive ordered oldest to newest; every scan here walks them newest
//! first so the most recent signal wins.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::types::{LogHints, LogLine, StopReason};

/// Phrases logged when a bot's trade ran to completion
const COMPLETION_PHRASES: [&str; 4] = [
    "fixed stop loss hit",
    "take profit hit",
    "all positions closed",
    "trade completed",
];

/// Phrase logged whenever the strategy shuts down, completed or not
const STOP_PHRASE: &str = "stopping the strategy";

/// Maximum characters of an error line carried into the stop reason
const ERROR_EXCERPT_CHARS: usize = 100;

/// Determine why a bot stopped.
///
/// A completed trade also logs a strategy-stop line right after the
/// completion line, so the whole general log is searched for a completion
/// phrase before any stop line is considered.
pub fn classify_stop_reason(general_logs: &[LogLine], error_logs: &[LogLine]) -> StopReason {
    let newest_first: Vec<String> = general_logs
        .iter()
        .rev()
        .map(|line| line.msg.to_lowercase())
        .collect();

    if newest_first
        .iter()
        .any(|msg| COMPLETION_PHRASES.iter().any(|phrase| msg.contains(phrase)))
    {
        return StopReason::TradeCompleted;
    }
    if newest_first.iter().any(|msg| msg.contains(STOP_PHRASE)) {
        return StopReason::ManualStop;
    }

    for line in error_logs.iter().rev() {
        let msg = line.msg.to_lowercase();
        if msg.contains("error") || msg.contains("exception") {
            let excerpt: String = line.msg.chars().take(ERROR_EXCERPT_CHARS).collect();
            return StopReason::Error(excerpt);
        }
    }

    StopReason::Unknown
}

/// A pattern that fails to compile disables its hint instead of the monitor
fn compile_hint(label: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("Invalid {} pattern, hint disabled: {}", label, e);
            None
        }
    }
}

fn pnl_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| compile_hint("PnL", r"PnL: ([\d.\-]+ [A-Z]+)"))
        .as_ref()
}

fn open_orders_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| compile_hint("open orders", r"Open Orders: (\d+)"))
        .as_ref()
}

fn capture_hint(pattern: Option<&Regex>, msg: &str, label: &str) -> Option<String> {
    pattern?
        .captures(msg)
        .map(|caps| format!("{}: {}", label, &caps[1]))
}

/// Best-effort PnL / open-orders hints from the log tail.
///
/// Each hint takes the most recent line that carries it.
pub fn parse_log_hints(general_logs: &[LogLine]) -> LogHints {
    let mut pnl = None;
    let mut open_orders = None;

    for line in general_logs.iter().rev() {
        if pnl.is_none() {
            pnl = capture_hint(pnl_pattern(), &line.msg, "PnL");
        }
        if open_orders.is_none() {
            open_orders = capture_hint(open_orders_pattern(), &line.msg, "Open Orders");
        }
        if pnl.is_some() && open_orders.is_some() {
            break;
        }
    }

    let defaults = LogHints::default();
    LogHints {
        pnl_info: pnl.unwrap_or(defaults.pnl_info),
        open_orders_info: open_orders.unwrap_or(defaults.open_orders_info),
    }
}
