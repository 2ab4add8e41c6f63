// =============================================================================
// User Store — persisted per-user monitoring settings
// =============================================================================
//
// A JSON object keyed by user id.  Loaded once at startup; every mutation
// made through the admin API is written back atomically (`.tmp` + rename).
// =============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::info;

use crate::types::{UserId, UserMonitorConfig};

pub struct UserStore {
    path: PathBuf,
    users: RwLock<BTreeMap<UserId, UserMonitorConfig>>,
}

impl UserStore {
    /// Load the store at `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let users: BTreeMap<UserId, UserMonitorConfig> = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read user store from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse user store from {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        info!(path = %path.display(), users = users.len(), "user store loaded");

        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    #[cfg(test)]
    pub fn get(&self, user_id: UserId) -> Option<UserMonitorConfig> {
        self.users.read().get(&user_id).cloned()
    }

    pub fn all(&self) -> Vec<(UserId, UserMonitorConfig)> {
        self.users
            .read()
            .iter()
            .map(|(&id, cfg)| (id, cfg.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn set(&self, user_id: UserId, config: UserMonitorConfig) {
        self.users.write().insert(user_id, config);
    }

    /// Remove `user_id`. Returns the settings that were stored, if any.
    pub fn remove(&self, user_id: UserId) -> Option<UserMonitorConfig> {
        self.users.write().remove(&user_id)
    }

    pub fn save(&self) -> Result<()> {
        let content = {
            let users = self.users.read();
            serde_json::to_string_pretty(&*users).context("failed to serialise user store")?
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp user store to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp user store to {}", self.path.display()))?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn oi_only(channel: &str) -> UserMonitorConfig {
        UserMonitorConfig {
            monitor_oi: true,
            oi_threshold: 5.0,
            channel: channel.into(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn save_then_load_preserves_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.json");

        let store = UserStore::load(&path).unwrap();
        store.set(42, oi_only("bot1"));
        store.set(7, oi_only("bot2"));
        store.save().unwrap();

        let reloaded = UserStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(42), Some(oi_only("bot1")));
        let ids: Vec<UserId> = reloaded.all().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![7, 42]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn reads_stored_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"1001": {"change_threshold": 2.5, "time_frame": "15m", "target_bot": "bot1",
                         "monitor_oi": true, "oi_threshold": 4.0}}"#,
        )
        .unwrap();

        let store = UserStore::load(&path).unwrap();
        let cfg = store.get(1001).unwrap();
        assert_eq!(cfg.time_frame, "15m");
        assert_eq!(cfg.change_threshold, 2.5);
        assert_eq!(cfg.channel, "bot1");
        assert!(cfg.monitor_oi);
    }

    #[test]
    fn remove_reports_previous_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::load(dir.path().join("users.json")).unwrap();
        store.set(3, oi_only("bot1"));
        assert_eq!(store.remove(3), Some(oi_only("bot1")));
        assert_eq!(store.remove(3), None);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(UserStore::load(&path).is_err());
    }
}
