//! Control Plane Gateway - Hummingbot API client

use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::types::{BotDetail, PerformanceSummary, RemoteBotSnapshot, RemotePhase};

/// Operations the reconciler needs from the control plane
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Status of every instance the control plane knows about, keyed by
    /// instance name. Fails as a whole; never returns a partial map.
    async fn get_all_statuses(&self) -> Result<HashMap<String, RemoteBotSnapshot>>;

    /// Configuration of one instance
    async fn get_bot_detail(&self, instance_name: &str) -> Result<BotDetail>;

    /// Stop and archive an instance. Safe to repeat on an archived instance.
    async fn archive_bot(&self, instance_name: &str) -> Result<Value>;

    /// Paths of all archived bot databases
    async fn list_archived_databases(&self) -> Result<Vec<String>>;

    /// Performance summary stored in an archived database
    async fn get_database_performance(&self, db_path: &str) -> Result<PerformanceSummary>;

    /// Release the connection
    async fn close(&self) {}
}

/// HTTP client for the Hummingbot API
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ControlPlaneClient {
    /// Create new control plane client
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn post_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::ControlPlane {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        if body.get("status").and_then(Value::as_str) == Some("error") {
            return Err(MonitorError::InvalidResponse(body.to_string()));
        }
        Ok(body)
    }
}

/// Unwrap the `{"status": ..., "data": ...}` envelope when present
fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut fields) if fields.get("data").map_or(false, Value::is_object) => {
            fields.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Parse the status map. Entries that are not objects are kept with an
/// unrecognised phase so the instance stays tracked.
pub fn parse_status_map(body: Value) -> Result<HashMap<String, RemoteBotSnapshot>> {
    let entries = match body {
        Value::Object(mut fields) => match fields.remove("data") {
            Some(Value::Object(entries)) => entries,
            Some(Value::Null) | None => serde_json::Map::new(),
            Some(other) => {
                return Err(MonitorError::InvalidResponse(format!(
                    "status data is not an object: {}",
                    other
                )))
            }
        },
        other => {
            return Err(MonitorError::InvalidResponse(format!(
                "status response is not an object: {}",
                other
            )))
        }
    };

    let mut snapshots = HashMap::with_capacity(entries.len());
    for (instance_name, entry) in entries {
        let mut snapshot = match serde_json::from_value::<RemoteBotSnapshot>(entry) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(instance = %instance_name, "Malformed status entry: {}", e);
                RemoteBotSnapshot::new(&instance_name, RemotePhase::Other("malformed".to_string()))
            }
        };
        snapshot.instance_name = instance_name.clone();
        snapshots.insert(instance_name, snapshot);
    }
    Ok(snapshots)
}

/// Extract database paths from either a bare list or `{"databases": [...]}`
fn parse_database_list(body: Value) -> Vec<String> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut fields) => match fields.remove("databases").or_else(|| fields.remove("data")) {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(path) => Some(path),
            Value::Object(mut fields) => match fields.remove("name") {
                Some(Value::String(path)) => Some(path),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Locate the summary in a performance response
fn parse_performance(body: Value) -> Result<PerformanceSummary> {
    let summary = body
        .get("summary")
        .or_else(|| body.pointer("/performance/summary"))
        .or_else(|| body.pointer("/data/summary"))
        .cloned()
        .ok_or_else(|| MonitorError::InvalidResponse("performance summary missing".to_string()))?;

    Ok(serde_json::from_value(summary)?)
}

#[async_trait::async_trait]
impl ControlPlane for ControlPlaneClient {
    async fn get_all_statuses(&self) -> Result<HashMap<String, RemoteBotSnapshot>> {
        let body = self.get_json("/bot-orchestration/status").await?;
        let snapshots = parse_status_map(body)?;
        debug!("Control plane reports {} instances", snapshots.len());
        Ok(snapshots)
    }

    async fn get_bot_detail(&self, instance_name: &str) -> Result<BotDetail> {
        let body = self
            .get_json(&format!("/bot-orchestration/{}/status", instance_name))
            .await?;
        Ok(serde_json::from_value(unwrap_data(body))?)
    }

    async fn archive_bot(&self, instance_name: &str) -> Result<Value> {
        let response = self
            .post_json(
                &format!("/bot-orchestration/stop-and-archive-bot/{}", instance_name),
                &[
                    ("skip_order_cancellation", "true"),
                    ("archive_locally", "true"),
                ],
            )
            .await?;
        info!(instance = %instance_name, "Archive requested");
        Ok(response)
    }

    async fn list_archived_databases(&self) -> Result<Vec<String>> {
        let body = self.get_json("/archived-bots/").await?;
        Ok(parse_database_list(body))
    }

    async fn get_database_performance(&self, db_path: &str) -> Result<PerformanceSummary> {
        let body = self
            .get_json(&format!("/archived-bots/{}/performance", db_path.trim_start_matches('/')))
            .await?;
        parse_performance(body)
    }

    async fn close(&self) {
        info!("Control plane client closed");
    }
}
