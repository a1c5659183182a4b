//! Trade fill extraction with per-instance deduplication
//!
//! The control plane returns a growing log tail rather than a cursor, so the
//! same fill line shows up in every snapshot until it scrolls out. Each
//! instance keeps a bounded window of identity keys it has already emitted.

use regex::Regex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::types::{LogLine, TradeEvent, TradeSide};

/// Default number of identity keys remembered per instance
pub const DEFAULT_DEDUP_CAPACITY: usize = 1000;

fn fill_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            match Regex::new(
                r"(BUY|SELL) order .*? amounting to ([\d.]+)/[\d.]+ ([A-Z]+) has been filled at ([\d.]+) ([A-Z]+)\.",
            ) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Invalid fill pattern, fills will not be reported: {}", e);
                    None
                }
            }
        })
        .as_ref()
}

/// A fill matched in one log line, before deduplication
#[derive(Debug, Clone, PartialEq)]
struct ParsedFill {
    event: TradeEvent,
    identity_key: String,
}

/// Match one log line against the fill pattern
fn parse_fill(instance_name: &str, line: &LogLine) -> Option<ParsedFill> {
    let caps = fill_pattern()?.captures(&line.msg)?;

    let side = match &caps[1] {
        "BUY" => TradeSide::Buy,
        _ => TradeSide::Sell,
    };
    let raw_amount = &caps[2];
    let raw_price = &caps[4];
    let amount = Decimal::from_str(raw_amount).ok()?;
    let price = Decimal::from_str(raw_price).ok()?;
    let trading_pair = format!("{}-{}", &caps[3], &caps[5]);

    let identity_key = format!(
        "{}-{}-{}-{}-{}-{}",
        instance_name, trading_pair, side, raw_amount, raw_price, line.timestamp
    );

    Some(ParsedFill {
        event: TradeEvent {
            instance_name: instance_name.to_string(),
            trading_pair,
            side,
            price,
            amount,
            source_timestamp: line.timestamp.clone(),
        },
        identity_key,
    })
}

/// Bounded set of identity keys, evicting the oldest first
#[derive(Debug, Default)]
struct SeenKeys {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl SeenKeys {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if self.keys.insert(key.clone()) {
            self.order.push_back(key);
        }
    }

    /// Drop the oldest keys beyond `capacity`, never one still in `visible`
    fn trim(&mut self, capacity: usize, visible: &HashSet<String>) {
        if self.order.len() <= capacity {
            return;
        }
        let mut excess = self.order.len() - capacity;
        let mut kept = VecDeque::with_capacity(self.order.len());
        for key in self.order.drain(..) {
            if excess > 0 && !visible.contains(&key) {
                self.keys.remove(&key);
                excess -= 1;
            } else {
                kept.push_back(key);
            }
        }
        self.order = kept;
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Extracts fills from general logs, emitting each identity key once
#[derive(Debug)]
pub struct TradeEventExtractor {
    seen: HashMap<String, SeenKeys>,
    capacity: usize,
}

impl TradeEventExtractor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DEDUP_CAPACITY)
    }

    /// Keys still visible in the latest log tail are kept even past
    /// `capacity`, so a long tail never replays its own fills.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Return the fills not yet emitted for `instance_name`, oldest first,
    /// and remember them.
    pub fn extract_new(&mut self, instance_name: &str, general_logs: &[LogLine]) -> Vec<TradeEvent> {
        let fills: Vec<ParsedFill> = general_logs
            .iter()
            .filter_map(|line| parse_fill(instance_name, line))
            .collect();
        let visible: HashSet<String> = fills.iter().map(|f| f.identity_key.clone()).collect();

        let seen = self.seen.entry(instance_name.to_string()).or_default();
        let mut fresh = Vec::new();
        for fill in fills {
            if seen.contains(&fill.identity_key) {
                debug!(instance = %instance_name, key = %fill.identity_key, "Fill already notified");
                continue;
            }
            seen.insert(fill.identity_key);
            fresh.push(fill.event);
        }
        seen.trim(self.capacity, &visible);

        fresh
    }

    /// Drop all state for an instance that is no longer tracked
    pub fn forget(&mut self, instance_name: &str) {
        self.seen.remove(instance_name);
    }

    /// Number of keys remembered for an instance
    pub fn tracked_keys(&self, instance_name: &str) -> usize {
        self.seen.get(instance_name).map(SeenKeys::len).unwrap_or(0)
    }
}

impl Default for TradeEventExtractor {
    fn default() -> Self {
        Self::new()
    }
}
