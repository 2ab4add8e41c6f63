// =============================================================================
// OI Pulse — Main Entry Point
// =============================================================================
//
// Polls Binance USDⓈ-M futures for price and open-interest moves on behalf of
// every subscribed user and delivers alerts through their chosen bot.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod binance;
mod monitor;
mod notify;
mod runtime_config;
mod types;
mod user_store;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::binance::BinanceFuturesClient;
use crate::monitor::MonitorSupervisor;
use crate::notify::TelegramNotifier;
use crate::runtime_config::RuntimeConfig;
use crate::user_store::UserStore;

const DEFAULT_CONFIG_PATH: &str = "oi_pulse.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              OI Pulse — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("OI_PULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    if config.bots.is_empty() {
        warn!("No delivery bots configured — every alert will fail to send");
    }
    if config.admin_token.is_empty() {
        warn!("OI_PULSE_ADMIN_TOKEN is not set — authenticated API endpoints are disabled");
    }

    // ── 2. Collaborators ─────────────────────────────────────────────────
    let binance = Arc::new(BinanceFuturesClient::new(config.binance_base_url.clone()));
    let notifier = Arc::new(TelegramNotifier::new(config.bots.clone()));
    info!(channels = ?notifier.channels().collect::<Vec<_>>(), "Telegram notifier ready");

    let user_store = Arc::new(UserStore::load(&config.user_store_path)?);

    // ── 3. Supervisor & symbol universe ──────────────────────────────────
    let supervisor = Arc::new(
        MonitorSupervisor::bootstrap(
            binance.clone(),
            notifier,
            config.monitor.clone(),
            &config.symbols,
        )
        .await,
    );
    let weight = binance.rate_limit().snapshot();
    info!(
        used_weight_1m = weight.used_weight_1m,
        hard_limit = weight.hard_limit,
        "Exchange weight after symbol listing"
    );

    // ── 4. Resume stored users ───────────────────────────────────────────
    let mut resumed = 0usize;
    for (user_id, settings) in user_store.all() {
        match supervisor.start_session(user_id, settings) {
            Ok(_) => resumed += 1,
            Err(e) => info!(user_id, reason = %e, "Stored user not resumed"),
        }
    }
    info!(resumed, stored = user_store.len(), "Stored users processed");

    // ── 5. API server ────────────────────────────────────────────────────
    let state = Arc::new(AppState::new(&config, supervisor.clone(), user_store.clone()));
    let listener = tokio::net::TcpListener::bind(&config.api_bind_addr).await?;
    info!(addr = %config.api_bind_addr, "API server listening");

    let app = api::router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    supervisor.shutdown_all().await;

    if let Err(e) = user_store.save() {
        error!(error = %e, "Failed to save user store on shutdown");
    }

    info!("OI Pulse shut down complete.");
    Ok(())
}
