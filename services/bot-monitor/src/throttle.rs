//! Heartbeat throttle for running-bot status messages

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Default minimum gap between two heartbeats for the same instance
pub const DEFAULT_HEARTBEAT_COOLDOWN_SECS: i64 = 300;

/// Tracks when each instance last got a "still running" message
#[derive(Debug)]
pub struct HeartbeatThrottle {
    cooldown: Duration,
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl HeartbeatThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: HashMap::new(),
        }
    }

    /// True if no heartbeat went out for this instance within the cooldown
    pub fn is_due(&self, instance_name: &str, now: DateTime<Utc>) -> bool {
        self.last_sent
            .get(instance_name)
            .map(|last| now.signed_duration_since(*last) >= self.cooldown)
            .unwrap_or(true)
    }

    pub fn record_sent(&mut self, instance_name: &str, now: DateTime<Utc>) {
        self.last_sent.insert(instance_name.to_string(), now);
    }

    /// Forget the instance so its next running report is announced at once
    pub fn reset(&mut self, instance_name: &str) {
        self.last_sent.remove(instance_name);
    }
}

impl Default for HeartbeatThrottle {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_HEARTBEAT_COOLDOWN_SECS))
    }
}
