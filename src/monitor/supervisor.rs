// =============================================================================
// Monitoring Supervisor — registry of per-user sessions
// =============================================================================
//
// Owns:
//   - the symbol universe, listed once at startup,
//   - the root cancellation token every session token is derived from,
//   - the registry `user_id → SessionHandle`.
//
// `start_session` cancels and replaces any live session for the same user
// while holding the registry lock, so a user never has two sessions.  The
// lock only guards map operations; no I/O happens under it.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::session::MonitorSession;
use super::source::ExchangeDataSource;
use crate::notify::NotificationSink;
use crate::runtime_config::MonitorParams;
use crate::types::{UserId, UserMonitorConfig};

/// Why a session was not started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("user {user_id} has no usable monitor configured")]
    Ineligible { user_id: UserId },

    #[error("symbol universe is empty")]
    NoSymbols,

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

struct SessionHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    config: UserMonitorConfig,
    started_at: DateTime<Utc>,
}

/// Registry entry as exposed to the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub session_id: Uuid,
    pub channel: String,
    pub price_monitor: bool,
    pub oi_monitor: bool,
    pub started_at: DateTime<Utc>,
}

pub struct MonitorSupervisor {
    source: Arc<dyn ExchangeDataSource>,
    sink: Arc<dyn NotificationSink>,
    params: MonitorParams,
    symbols: Arc<Vec<String>>,
    root: CancellationToken,
    sessions: Mutex<HashMap<UserId, SessionHandle>>,
}

impl MonitorSupervisor {
    /// List the symbol universe and build the supervisor.
    ///
    /// `allow_list`, when non-empty, narrows the listing. A failed or empty
    /// listing is logged; the supervisor is still returned but refuses every
    /// session with [`SupervisorError::NoSymbols`].
    pub async fn bootstrap(
        source: Arc<dyn ExchangeDataSource>,
        sink: Arc<dyn NotificationSink>,
        params: MonitorParams,
        allow_list: &[String],
    ) -> Self {
        let symbols = match source.list_tradable_symbols().await {
            Ok(mut listed) => {
                if !allow_list.is_empty() {
                    listed.retain(|s| allow_list.contains(s));
                }
                listed
            }
            Err(e) => {
                error!(error = %e, "failed to list tradable symbols, monitoring disabled");
                Vec::new()
            }
        };

        if symbols.is_empty() {
            error!("symbol universe is empty, no session can start");
        } else {
            info!(count = symbols.len(), "symbol universe loaded");
        }

        Self::with_symbols(source, sink, params, symbols)
    }

    pub fn with_symbols(
        source: Arc<dyn ExchangeDataSource>,
        sink: Arc<dyn NotificationSink>,
        params: MonitorParams,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            source,
            sink,
            params,
            symbols: Arc::new(symbols),
            root: CancellationToken::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Start monitoring `user_id` under `config`, superseding any session the
    /// user already has. Must be called from within a Tokio runtime.
    pub fn start_session(
        &self,
        user_id: UserId,
        config: UserMonitorConfig,
    ) -> Result<Uuid, SupervisorError> {
        if self.root.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }
        if !config.is_eligible() {
            info!(user_id, "configuration not eligible, session not started");
            return Err(SupervisorError::Ineligible { user_id });
        }
        if self.symbols.is_empty() {
            error!(user_id, "no symbols available, session not started");
            return Err(SupervisorError::NoSymbols);
        }

        let session_id = Uuid::new_v4();
        let cancel = self.root.child_token();
        let session = MonitorSession::new(
            user_id,
            session_id,
            config.clone(),
            Arc::clone(&self.symbols),
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.params.clone(),
        );

        let mut sessions = self.sessions.lock();
        // `shutdown_all` may have drained the registry since the check above.
        if self.root.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }
        if let Some(previous) = sessions.remove(&user_id) {
            previous.cancel.cancel();
            info!(
                user_id,
                previous_session = %previous.session_id,
                new_session = %session_id,
                "superseding existing session"
            );
        }
        let task = tokio::spawn(session.run(cancel.clone()));
        sessions.insert(
            user_id,
            SessionHandle {
                session_id,
                cancel,
                task,
                config,
                started_at: Utc::now(),
            },
        );

        Ok(session_id)
    }

    /// Cancel and forget `user_id`'s session. Returns whether one was live.
    pub fn stop_session(&self, user_id: UserId) -> bool {
        let removed = self.sessions.lock().remove(&user_id);
        match removed {
            Some(handle) => {
                handle.cancel.cancel();
                info!(user_id, session_id = %handle.session_id, "session stopped");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, user_id: UserId) -> bool {
        self.sessions.lock().contains_key(&user_id)
    }

    pub fn active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(&user_id, h)| SessionInfo {
                user_id,
                session_id: h.session_id,
                channel: h.config.channel.clone(),
                price_monitor: h.config.price_monitor_enabled(),
                oi_monitor: h.config.oi_monitor_enabled(),
                started_at: h.started_at,
            })
            .collect();
        infos.sort_by_key(|i| i.user_id);
        infos
    }

    /// Cancel every session and wait for their tasks to finish.
    pub async fn shutdown_all(&self) {
        self.root.cancel();

        let drained: Vec<(UserId, SessionHandle)> = self.sessions.lock().drain().collect();
        let count = drained.len();

        for (user_id, handle) in drained {
            if let Err(e) = handle.task.await {
                warn!(user_id, error = %e, "session task ended abnormally");
            }
        }

        info!(sessions = count, "all monitoring sessions stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::{FakeExchange, RecordingSink};

    fn price_config(channel: &str) -> UserMonitorConfig {
        UserMonitorConfig {
            time_frame: "5m".into(),
            change_threshold: 3.0,
            channel: channel.into(),
            ..Default::default()
        }
    }

    fn supervisor_with(symbols: &[&str]) -> MonitorSupervisor {
        MonitorSupervisor::with_symbols(
            Arc::new(FakeExchange::with_symbols(symbols)),
            Arc::new(RecordingSink::default()),
            MonitorParams::default(),
            symbols.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn bootstrap_applies_allow_list() {
        let ex = Arc::new(FakeExchange::with_symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"]));
        let sup = MonitorSupervisor::bootstrap(
            ex,
            Arc::new(RecordingSink::default()),
            MonitorParams::default(),
            &["ETHUSDT".to_string(), "DOGEUSDT".to_string()],
        )
        .await;
        assert_eq!(sup.symbol_count(), 1);
    }

    #[tokio::test]
    async fn failed_listing_refuses_sessions() {
        let ex = Arc::new(FakeExchange::with_symbols(&["BTCUSDT"]));
        ex.fail_listing();
        let sup = MonitorSupervisor::bootstrap(
            ex,
            Arc::new(RecordingSink::default()),
            MonitorParams::default(),
            &[],
        )
        .await;
        assert_eq!(sup.start_session(1, price_config("bot1")), Err(SupervisorError::NoSymbols));
        assert!(!sup.is_active(1));
    }

    #[tokio::test]
    async fn ineligible_config_is_refused() {
        let sup = supervisor_with(&["BTCUSDT"]);
        let err = sup.start_session(5, UserMonitorConfig::default()).unwrap_err();
        assert_eq!(err, SupervisorError::Ineligible { user_id: 5 });
        assert!(sup.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn restart_supersedes_previous_session() {
        let sup = supervisor_with(&["BTCUSDT"]);
        let first = sup.start_session(7, price_config("bot1")).unwrap();
        let first_token = sup.sessions.lock()[&7].cancel.clone();

        let second = sup.start_session(7, price_config("bot2")).unwrap();

        assert_ne!(first, second);
        assert!(first_token.is_cancelled());
        let infos = sup.active_sessions();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].session_id, second);
        assert_eq!(infos[0].channel, "bot2");
        assert!(!sup.sessions.lock()[&7].cancel.is_cancelled());

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn sessions_for_different_users_coexist() {
        let sup = supervisor_with(&["BTCUSDT"]);
        sup.start_session(1, price_config("bot1")).unwrap();
        sup.start_session(2, price_config("bot1")).unwrap();

        let users: Vec<UserId> = sup.active_sessions().iter().map(|i| i.user_id).collect();
        assert_eq!(users, vec![1, 2]);

        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn stop_session_cancels_only_that_user() {
        let sup = supervisor_with(&["BTCUSDT"]);
        sup.start_session(1, price_config("bot1")).unwrap();
        sup.start_session(2, price_config("bot1")).unwrap();
        let token_one = sup.sessions.lock()[&1].cancel.clone();
        let token_two = sup.sessions.lock()[&2].cancel.clone();

        assert!(sup.stop_session(1));
        assert!(!sup.stop_session(1));

        assert!(token_one.is_cancelled());
        assert!(!token_two.is_cancelled());
        assert!(sup.is_active(2));

        sup.shutdown_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_racing_shutdown_leaves_no_handle() {
        let sup = Arc::new(supervisor_with(&["BTCUSDT"]));

        // Hold the registry so the start blocks after its first check.
        let guard = sup.sessions.lock();
        let starter = Arc::clone(&sup);
        let start =
            tokio::task::spawn_blocking(move || starter.start_session(9, price_config("bot1")));
        std::thread::sleep(std::time::Duration::from_millis(50));
        sup.root.cancel();
        drop(guard);

        assert_eq!(start.await.unwrap(), Err(SupervisorError::ShuttingDown));
        assert!(sup.active_sessions().is_empty());
        sup.shutdown_all().await;
    }

    #[tokio::test]
    async fn shutdown_drains_and_blocks_new_sessions() {
        let sup = supervisor_with(&["BTCUSDT"]);
        sup.start_session(1, price_config("bot1")).unwrap();
        sup.start_session(2, price_config("bot1")).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), sup.shutdown_all())
            .await
            .expect("shutdown should complete promptly");

        assert!(sup.active_sessions().is_empty());
        assert_eq!(
            sup.start_session(3, price_config("bot1")),
            Err(SupervisorError::ShuttingDown)
        );
    }
}
