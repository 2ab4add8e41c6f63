// =============================================================================
// Central Application State — OI Pulse
// =============================================================================
//
// Ties the supervisor, the user store and the static channel listing together
// for the admin API.  Shared across handlers via `Arc<AppState>`.
//
// Thread safety:
//   - The supervisor and the store manage their own interior mutability.
//   - `settings_version` is a lock-free counter bumped on every stored
//     settings change so clients can detect updates cheaply.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::monitor::MonitorSupervisor;
use crate::runtime_config::RuntimeConfig;
use crate::user_store::UserStore;

/// A delivery channel as advertised to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub bot_username: Option<String>,
}

pub struct AppState {
    pub supervisor: Arc<MonitorSupervisor>,
    pub user_store: Arc<UserStore>,
    pub channels: Vec<ChannelInfo>,
    admin_token: String,
    settings_version: AtomicU64,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &RuntimeConfig,
        supervisor: Arc<MonitorSupervisor>,
        user_store: Arc<UserStore>,
    ) -> Self {
        let mut channels: Vec<ChannelInfo> = config
            .bots
            .keys()
            .map(|name| ChannelInfo {
                name: name.clone(),
                bot_username: config.bot_usernames.get(name).cloned(),
            })
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            supervisor,
            user_store,
            channels,
            admin_token: config.admin_token.clone(),
            settings_version: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Token authenticated endpoints compare against. Empty means none is
    /// configured.
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn settings_version(&self) -> u64 {
        self.settings_version.load(Ordering::Relaxed)
    }

    pub fn bump_settings_version(&self) -> u64 {
        self.settings_version.fetch_add(1, Ordering::Relaxed) + 1
    }
}
