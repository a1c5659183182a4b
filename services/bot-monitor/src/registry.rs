//! Registry Store - persist the set of tracked bots as one JSON file
//!
//! The whole collection is the unit of persistence: every save rewrites the
//! file through a temp file + rename so readers never see a partial write.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{TrackedBotRecord, UNKNOWN_PAIR};

/// Default registry file name
pub const REGISTRY_FILE: &str = "active_trades.json";

/// Stored record shape; tolerates missing fields so one bad entry does not
/// poison the whole file
#[derive(Debug, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    instance_name: Option<String>,
    #[serde(default, alias = "chat_id")]
    recipient_id: Option<String>,
    #[serde(default)]
    trading_pair: Option<String>,
    #[serde(default)]
    order_amount_usd: rust_decimal::Decimal,
    #[serde(default)]
    trailing_stop_loss_delta: rust_decimal::Decimal,
    #[serde(default)]
    take_profit_delta: rust_decimal::Decimal,
    #[serde(default)]
    fixed_stop_loss_delta: rust_decimal::Decimal,
}

impl StoredRecord {
    fn into_record(self) -> Option<TrackedBotRecord> {
        let instance_name = self.instance_name.filter(|name| !name.is_empty())?;
        Some(TrackedBotRecord {
            instance_name,
            recipient_id: self.recipient_id.unwrap_or_default(),
            trading_pair: self
                .trading_pair
                .unwrap_or_else(|| UNKNOWN_PAIR.to_string()),
            order_amount_usd: self.order_amount_usd,
            trailing_stop_loss_delta: self.trailing_stop_loss_delta,
            take_profit_delta: self.take_profit_delta,
            fixed_stop_loss_delta: self.fixed_stop_loss_delta,
        })
    }
}

/// File-backed store of tracked bot records
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. Never fails: a missing or corrupt file yields an
    /// empty registry, entries without an instance name are dropped, and
    /// duplicate instance names keep their first entry.
    pub async fn load(&self) -> Vec<TrackedBotRecord> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Registry {} not found, starting empty", self.path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Failed to read registry {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        if content.trim().is_empty() {
            return Vec::new();
        }

        let stored: Vec<StoredRecord> = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Corrupt registry {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(stored.len());
        for entry in stored {
            match entry.into_record() {
                Some(record) if seen.insert(record.instance_name.clone()) => records.push(record),
                Some(record) => {
                    warn!(instance = %record.instance_name, "Duplicate registry entry dropped");
                }
                None => warn!("Registry entry without instance_name dropped"),
            }
        }
        records
    }

    /// Atomically replace the stored collection
    pub async fn save(&self, records: &[TrackedBotRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.path).await?;

        debug!("Saved {} tracked bots to {}", records.len(), self.path.display());
        Ok(())
    }
}
