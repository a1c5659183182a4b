//! Bot Monitor - watches Hummingbot bots and reports on them over Telegram
//!
//! Each cycle:
//! 1. Pulls bot statuses from the control plane
//! 2. Admits newly launched bots into the local registry
//! 3. Notifies fills, heartbeats and stop reasons
//! 4. Archives completed or vanished bots

use anyhow::Context;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bot_monitor::{
    ControlPlaneClient, MonitorConfig, MonitorRunner, Reconciler, RegistryStore, TelegramNotifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let config = MonitorConfig::load().context("Failed to load configuration")?;

    let level = tracing::Level::from_str(&config.log_level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Bot Monitor...");
    config.validate().context("Invalid configuration")?;
    info!(
        "Control Plane: {}, registry: {}",
        config.control_plane_url,
        config.registry_path.display()
    );
    if config.dry_run {
        warn!("Dry run: notifications are logged, not sent");
    }

    let control_plane = Arc::new(
        ControlPlaneClient::new(
            &config.control_plane_url,
            &config.control_plane_username,
            &config.control_plane_password,
            config.request_timeout(),
        )
        .context("Failed to build control plane client")?,
    );
    let notifier = Arc::new(
        TelegramNotifier::new(
            &config.telegram_bot_token,
            config.request_timeout(),
            config.dry_run,
        )
        .context("Failed to build Telegram client")?,
    );

    let mut reconciler = Reconciler::new(
        control_plane,
        notifier,
        RegistryStore::new(config.registry_path.clone()),
        &config.telegram_chat_id,
    )
    .with_heartbeat_cooldown(config.heartbeat_cooldown())
    .with_dedup_capacity(config.trade_dedup_capacity);
    if config.final_pnl_enabled {
        reconciler = reconciler.with_final_pnl(config.final_pnl_attempts, config.final_pnl_retry());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    MonitorRunner::new(reconciler, config.check_interval(), cancel)
        .run()
        .await;

    info!("Bot Monitor stopped");
    Ok(())
}
