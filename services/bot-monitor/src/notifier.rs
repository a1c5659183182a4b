//! Notification Gateway - Telegram delivery of bot lifecycle messages
//!
//! Messages are rendered as Telegram MarkdownV2. Dynamic values are either
//! escaped as plain text or wrapped in inline code spans.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::types::{LogHints, PerformanceSummary, RemotePhase, StopReason, TradeEvent, TradeSide};

/// Default Telegram Bot API endpoint
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// A message for one recipient
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StatusUpdate {
        instance_name: String,
        trading_pair: String,
        phase: RemotePhase,
        stop_reason: Option<StopReason>,
        hints: Option<LogHints>,
        final_pnl: Option<PerformanceSummary>,
    },
    NotFoundAlert {
        instance_name: String,
        trading_pair: String,
    },
    TradeUpdate(TradeEvent),
    Error {
        message: String,
    },
    /// Free text, sent as-is after escaping
    Plain {
        text: String,
    },
}

impl Notification {
    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::StatusUpdate { .. } => "status_update",
            Notification::NotFoundAlert { .. } => "not_found_alert",
            Notification::TradeUpdate(_) => "trade_update",
            Notification::Error { .. } => "error",
            Notification::Plain { .. } => "plain",
        }
    }

    /// Render as Telegram MarkdownV2
    pub fn render(&self) -> String {
        match self {
            Notification::StatusUpdate {
                instance_name,
                trading_pair,
                phase,
                stop_reason,
                hints,
                final_pnl,
            } => {
                let emoji = if *phase == RemotePhase::Running { "🟢" } else { "🔔" };
                let hints = hints.clone().unwrap_or_default();
                let pnl = match final_pnl {
                    Some(summary) => render_pnl_summary(summary),
                    None => escape_markdown(&hints.pnl_info),
                };

                let mut message = format!(
                    "{emoji} Bot Status Update {emoji}\nBot: {}\nPair: {}\n{}\n{}\nStatus: {}\\.",
                    code(instance_name),
                    code(trading_pair),
                    pnl,
                    escape_markdown(&hints.open_orders_info),
                    escape_markdown(phase.as_str()),
                );
                if let Some(reason) = stop_reason {
                    message.push_str(&format!(" \\({}\\)", escape_markdown(&reason.to_string())));
                }
                message
            }
            Notification::NotFoundAlert {
                instance_name,
                trading_pair,
            } => format!(
                "⚠️ Bot Not Found\\! ⚠️\nBot: {}\nPair: {}\nStatus: Not found on Hummingbot instance\\.",
                code(instance_name),
                code(trading_pair),
            ),
            Notification::TradeUpdate(event) => {
                let side = match event.side {
                    TradeSide::Buy => "🟢 BUY",
                    TradeSide::Sell => "🔴 SELL",
                };
                format!(
                    "📈 New Trade Alert\\! 📉\nBot: {}\nPair: {}\nType: {}\nPrice: {}\nAmount: {}\nTime: {}",
                    code(&event.instance_name),
                    code(&event.trading_pair),
                    code(side),
                    code(&event.price.to_string()),
                    code(&event.amount.to_string()),
                    code(&event.source_timestamp),
                )
            }
            Notification::Error { message } => {
                format!("❌ An error occurred: {}", escape_markdown(message))
            }
            Notification::Plain { text } => escape_markdown(text),
        }
    }
}

fn render_pnl_summary(summary: &PerformanceSummary) -> String {
    let net = summary_value(&summary.final_net_pnl_quote);
    format!(
        "📊 *PnL Summary* 📊\n  Total PnL: {}\n  Total Volume \\(Quote\\): {}\n  Total Fees \\(Quote\\): {}",
        code(&net),
        code(&summary_value(&summary.total_volume_quote)),
        code(&summary_value(&summary.total_fees_quote)),
    )
}

fn summary_value(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Escape text for MarkdownV2 outside of code spans
pub fn escape_markdown(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
        '\\',
    ];
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Wrap a value in an inline code span
fn code(text: &str) -> String {
    let inner = text.replace('\\', "\\\\").replace('`', "\\`");
    format!("`{}`", inner)
}

/// Delivers notifications to a recipient
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient_id: &str, notification: &Notification) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API notifier
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    dry_run: bool,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, timeout: Duration, dry_run: bool) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.to_string(),
            dry_run,
        })
    }

    /// Point at another Bot API server
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn failure(recipient_id: &str, reason: impl Into<String>) -> MonitorError {
        MonitorError::Notification {
            recipient: recipient_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, recipient_id: &str, notification: &Notification) -> Result<()> {
        if recipient_id.is_empty() {
            return Err(Self::failure(recipient_id, "no recipient configured"));
        }

        let text = notification.render();
        if self.dry_run {
            info!(recipient = %recipient_id, kind = notification.kind(), "DRY RUN message:\n{}", text);
            return Ok(());
        }

        // The token is part of the URL, so transport errors are stripped of it
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let payload = json!({
            "chat_id": recipient_id,
            "text": text,
            "parse_mode": "MarkdownV2",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::failure(recipient_id, e.without_url().to_string()))?;

        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(recipient_id, format!("HTTP {}: {}", status, e.without_url())))?;

        if !status.is_success() || !body.ok {
            let reason = body.description.unwrap_or_else(|| format!("HTTP {}", status));
            warn!(recipient = %recipient_id, kind = notification.kind(), "Telegram rejected message: {}", reason);
            return Err(Self::failure(recipient_id, reason));
        }

        debug!(recipient = %recipient_id, kind = notification.kind(), "Telegram message sent");
        Ok(())
    }
}
