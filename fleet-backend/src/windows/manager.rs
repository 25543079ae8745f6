//! Window lifecycle: reuse, repair, eviction, creation.
//!
//! `ensure_window` is the only entry point. It answers "give me a usable
//! window for this account", reusing a healthy binding when one exists,
//! cleaning up stale or mismatched ones, evicting the oldest inactive
//! window when the vendor quota is full, and cloning a template window
//! otherwise. Vendor failures degrade to "treat as absent"; the only
//! outputs are a window id or `None` plus log lines on the task stream.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::Database;
use crate::execution::TaskTracker;
use crate::gateway::TaskLogger;
use crate::models::{Account, DeviceClass, WindowInfo};
use crate::vendor::{CreateWindowSpec, WindowVendor};

pub struct WindowManager {
    db: Arc<Database>,
    vendor: Arc<dyn WindowVendor>,
    tracker: Arc<TaskTracker>,
    /// Device class every task window must have.
    required_class: DeviceClass,
    /// Spans the whole check/evict/create sequence so two workers cannot
    /// both claim the last quota slot.
    creation_lock: Mutex<()>,
}

impl WindowManager {
    pub fn new(
        db: Arc<Database>,
        vendor: Arc<dyn WindowVendor>,
        tracker: Arc<TaskTracker>,
        required_class: DeviceClass,
    ) -> Self {
        Self {
            db,
            vendor,
            tracker,
            required_class,
            creation_lock: Mutex::new(()),
        }
    }

    /// Make sure the account has a usable window; returns its id, or
    /// `None` when one can neither be reused nor created.
    pub async fn ensure_window(&self, email: &str, log: &TaskLogger) -> Option<String> {
        let account = match self.db.get_account(email) {
            Ok(Some(account)) => account,
            Ok(None) => return None,
            Err(e) => {
                log::error!("[WINDOWS] Account lookup failed for {}: {}", email, e);
                return None;
            }
        };

        let _guard = self.creation_lock.lock().await;

        // 1. The persisted binding, when it still points at a healthy
        //    window of the right shape.
        if let Some(window_id) = account.window_id.clone() {
            if let Some(id) = self.check_candidate(&window_id, email, log).await {
                return Some(id);
            }
        }

        // 2. The cached window config — a binding cleared earlier may
        //    still identify a reusable window.
        if let Some(restored_id) = cached_window_id(&account) {
            if account.window_id.as_deref() != Some(restored_id.as_str()) {
                if let Some(id) = self.check_candidate(&restored_id, email, log).await {
                    self.persist_binding(email, &id, false).await;
                    return Some(id);
                }
            }
        }

        // 3. Nothing reusable: create, evicting for quota if needed.
        log.info(Some(email), "No usable window bound, creating one").await;
        self.create_for_account(&account, log).await
    }

    /// Evaluate one candidate window id: does it exist, is it bound to
    /// this account, and does it match the required device class?
    /// Clears stale bindings and deletes wrong-device windows on the way.
    async fn check_candidate(
        &self,
        window_id: &str,
        email: &str,
        log: &TaskLogger,
    ) -> Option<String> {
        let info = match self.vendor.get_window(window_id).await {
            Some(info) => info,
            None => {
                // Window vanished on the vendor side.
                let _ = self.db.clear_window_binding(email);
                return None;
            }
        };

        if !info.matches_email(email) {
            // Bound identity belongs to someone else. Unbind and move on;
            // the window stays alive for its real owner.
            log.warn(
                Some(email),
                "Bound window belongs to a different account, unbinding",
            )
            .await;
            let _ = self.db.clear_window_binding(email);
            return None;
        }

        if info.device_class() == self.required_class {
            return Some(info.id);
        }

        log.info(
            Some(email),
            &format!(
                "Bound window is not a {} profile, deleting and recreating",
                self.required_class
            ),
        )
        .await;
        self.vendor.delete_window(&info.id).await;
        let _ = self.db.clear_window_binding(email);
        None
    }

    async fn create_for_account(&self, account: &Account, log: &TaskLogger) -> Option<String> {
        let email = &account.email;
        let quota = self.db.window_limit();
        let mut windows = self.vendor.list_windows(0, 1000).await;

        // Quota: evict the oldest window not serving any live task.
        if windows.len() >= quota {
            let active_ids = self.active_window_ids();
            let mut candidates: Vec<&WindowInfo> = windows
                .iter()
                .filter(|w| !active_ids.contains(&w.id))
                .collect();

            if candidates.is_empty() {
                log.error(
                    Some(email),
                    &format!(
                        "Window quota reached ({}/{}) and no window can be safely evicted",
                        windows.len(),
                        quota
                    ),
                )
                .await;
                return None;
            }

            candidates.sort_by_key(|w| w.seq());
            let oldest = candidates[0];
            let oldest_id = oldest.id.clone();
            let oldest_owner = oldest.user_name.clone();

            log.info(
                Some(email),
                &format!(
                    "Window quota reached ({}/{}), evicting oldest window: {}",
                    windows.len(),
                    quota,
                    oldest.display_name()
                ),
            )
            .await;

            self.vendor.delete_window(&oldest_id).await;
            if let Some(owner) = oldest_owner {
                let _ = self.db.clear_window_binding(&owner);
            }

            windows = self.vendor.list_windows(0, 1000).await;
        }

        if windows.is_empty() {
            log.error(Some(email), "No template window available, cannot create")
                .await;
            return None;
        }

        // Template: oldest window already of the required class, else any
        // window with the class forced onto the clone.
        let template = {
            let mut matching: Vec<&WindowInfo> = windows
                .iter()
                .filter(|w| w.device_class() == self.required_class)
                .collect();
            if matching.is_empty() {
                use rand::seq::SliceRandom;
                let fallback = windows
                    .choose(&mut rand::thread_rng())
                    .expect("window list is non-empty");
                log.info(
                    Some(email),
                    &format!(
                        "No {} template found, cloning {} and forcing the device class",
                        self.required_class,
                        fallback.display_name()
                    ),
                )
                .await;
                fallback.clone()
            } else {
                matching.sort_by_key(|w| w.seq());
                (*matching[0]).clone()
            }
        };

        // Guard against double-binding: someone else may have created a
        // window for this account outside our view.
        if let Some(existing) = windows.iter().find(|w| {
            w.user_name
                .as_deref()
                .map(|u| crate::models::normalize_email(u) == *email)
                .unwrap_or(false)
        }) {
            log.error(
                Some(email),
                &format!(
                    "Account already has a window ({}), refusing to create a duplicate",
                    existing.display_name()
                ),
            )
            .await;
            return None;
        }

        let spec = CreateWindowSpec {
            email: email.clone(),
            password: account.password.clone().unwrap_or_default(),
            recovery_email: account.recovery_email.clone().unwrap_or_default(),
            secret_key: account.secret_key.clone().unwrap_or_default(),
            device_class: self.required_class,
        };

        match self.vendor.create_window(&template, &spec).await {
            Ok(window_id) => {
                self.persist_binding(email, &window_id, true).await;
                let short = &window_id[..window_id.len().min(8)];
                log.info(Some(email), &format!("Window created: {}...", short))
                    .await;
                Some(window_id)
            }
            Err(e) => {
                log.error(Some(email), &format!("Window creation failed: {}", e))
                    .await;
                None
            }
        }
    }

    /// Save the binding, refreshing the cached window config (the restore
    /// cache) when asked.
    async fn persist_binding(&self, email: &str, window_id: &str, refresh_config: bool) {
        let config = if refresh_config {
            self.vendor
                .get_window(window_id)
                .await
                .and_then(|info| serde_json::to_string(&info).ok())
        } else {
            None
        };
        if let Err(e) = self
            .db
            .save_window_binding(email, window_id, config.as_deref())
        {
            log::warn!("[WINDOWS] Failed to persist binding for {}: {}", email, e);
        }
    }

    /// Window ids bound to accounts with live (pending/running) progress
    /// in any task — never eviction candidates.
    fn active_window_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for email in self.tracker.active_emails() {
            if let Ok(Some(account)) = self.db.get_account(&email) {
                if let Some(window_id) = account.window_id {
                    ids.insert(window_id);
                }
            }
        }
        ids
    }
}

/// Window id recorded in the account's cached window config, if any.
fn cached_window_id(account: &Account) -> Option<String> {
    let config = account.window_config.as_deref()?;
    let value: serde_json::Value = serde_json::from_str(config).ok()?;
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::test_database;
    use crate::db::AccountUpdate;
    use crate::gateway::{EventBroadcaster, EventPump};
    use crate::vendor::OpenedWindow;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;

    /// Scriptable in-memory vendor that records every call.
    struct FakeVendor {
        windows: PlMutex<Vec<WindowInfo>>,
        calls: PlMutex<Vec<String>>,
        next_seq: PlMutex<i64>,
        fail_create: bool,
    }

    impl FakeVendor {
        fn new(windows: Vec<WindowInfo>) -> Self {
            let next_seq = windows.iter().map(|w| w.seq()).max().unwrap_or(0) + 1;
            Self {
                windows: PlMutex::new(windows),
                calls: PlMutex::new(Vec::new()),
                next_seq: PlMutex::new(next_seq),
                fail_create: false,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn ids(&self) -> Vec<String> {
            self.windows.lock().iter().map(|w| w.id.clone()).collect()
        }
    }

    fn window(id: &str, user: Option<&str>, seq: i64, class: DeviceClass) -> WindowInfo {
        WindowInfo {
            id: id.to_string(),
            name: Some(format!("win_{}", seq)),
            user_name: user.map(String::from),
            remark: None,
            seq: Some(seq),
            os_type: Some(class.vendor_os_type().to_string()),
            os: None,
            fingerprint: None,
            extra: serde_json::Map::new(),
        }
    }

    #[async_trait]
    impl WindowVendor for FakeVendor {
        async fn list_windows(&self, _page: u32, _page_size: u32) -> Vec<WindowInfo> {
            self.calls.lock().push("list".to_string());
            self.windows.lock().clone()
        }

        async fn get_window(&self, id: &str) -> Option<WindowInfo> {
            self.calls.lock().push(format!("get:{}", id));
            self.windows.lock().iter().find(|w| w.id == id).cloned()
        }

        async fn create_window(
            &self,
            _template: &WindowInfo,
            spec: &CreateWindowSpec,
        ) -> Result<String, String> {
            self.calls.lock().push(format!("create:{}", spec.email));
            if self.fail_create {
                return Err("vendor rejected".to_string());
            }
            let mut seq = self.next_seq.lock();
            let id = format!("new-{}", *seq);
            self.windows.lock().push(window(
                &id,
                Some(&spec.email),
                *seq,
                spec.device_class,
            ));
            *seq += 1;
            Ok(id)
        }

        async fn delete_window(&self, id: &str) -> bool {
            self.calls.lock().push(format!("delete:{}", id));
            let mut windows = self.windows.lock();
            let before = windows.len();
            windows.retain(|w| w.id != id);
            windows.len() < before
        }

        async fn open_window(&self, _id: &str) -> Result<OpenedWindow, String> {
            Err("not implemented".to_string())
        }

        async fn close_window(&self, _id: &str) -> bool {
            true
        }
    }

    struct Fixture {
        db: Arc<Database>,
        tracker: Arc<TaskTracker>,
        vendor: Arc<FakeVendor>,
        manager: WindowManager,
        pump: EventPump,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn logger(&self) -> TaskLogger {
            TaskLogger::new(self.pump.handle())
        }
    }

    fn fixture(windows: Vec<WindowInfo>) -> Fixture {
        let (db, dir) = test_database();
        let db = Arc::new(db);
        let tracker = Arc::new(TaskTracker::new());
        let vendor = Arc::new(FakeVendor::new(windows));
        let manager = WindowManager::new(
            db.clone(),
            vendor.clone(),
            tracker.clone(),
            DeviceClass::Mobile,
        );
        let pump = EventPump::start(Arc::new(EventBroadcaster::new()));
        Fixture {
            db,
            tracker,
            vendor,
            manager,
            pump,
            _dir: dir,
        }
    }

    fn add_account(db: &Database, email: &str) {
        db.upsert_account(
            email,
            AccountUpdate {
                password: Some("pw".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account_makes_no_vendor_calls() {
        let fx = fixture(vec![]);
        let logger = fx.logger();
        assert!(fx.manager.ensure_window("ghost@x.com", &logger).await.is_none());
        assert!(fx.vendor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_matching_bound_window_is_reused_idempotently() {
        let fx = fixture(vec![window("w1", Some("a@x.com"), 1, DeviceClass::Mobile)]);
        add_account(&fx.db, "a@x.com");
        fx.db.save_window_binding("a@x.com", "w1", None).unwrap();
        let logger = fx.logger();

        let first = fx.manager.ensure_window("a@x.com", &logger).await;
        let second = fx.manager.ensure_window("a@x.com", &logger).await;
        assert_eq!(first.as_deref(), Some("w1"));
        assert_eq!(second.as_deref(), Some("w1"));

        // No create or delete calls happened.
        let calls = fx.vendor.calls();
        assert!(calls.iter().all(|c| !c.starts_with("create") && !c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_vanished_window_clears_binding_and_recreates() {
        let fx = fixture(vec![window("tpl", None, 1, DeviceClass::Mobile)]);
        add_account(&fx.db, "a@x.com");
        fx.db.save_window_binding("a@x.com", "gone", None).unwrap();
        let logger = fx.logger();

        let id = fx.manager.ensure_window("a@x.com", &logger).await.unwrap();
        assert!(id.starts_with("new-"));

        let account = fx.db.get_account("a@x.com").unwrap().unwrap();
        assert_eq!(account.window_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_mismatched_binding_is_unbound_not_deleted() {
        let fx = fixture(vec![
            window("w-other", Some("other@x.com"), 1, DeviceClass::Mobile),
            window("tpl", None, 2, DeviceClass::Mobile),
        ]);
        add_account(&fx.db, "a@x.com");
        fx.db.save_window_binding("a@x.com", "w-other", None).unwrap();
        let logger = fx.logger();

        let id = fx.manager.ensure_window("a@x.com", &logger).await.unwrap();
        assert!(id.starts_with("new-"));
        // The other account's window survived.
        assert!(fx.vendor.ids().contains(&"w-other".to_string()));
    }

    #[tokio::test]
    async fn test_wrong_device_class_window_is_replaced() {
        let fx = fixture(vec![
            window("w-desktop", Some("a@x.com"), 1, DeviceClass::Desktop),
            window("tpl-mobile", None, 2, DeviceClass::Mobile),
        ]);
        add_account(&fx.db, "a@x.com");
        fx.db.save_window_binding("a@x.com", "w-desktop", None).unwrap();
        let logger = fx.logger();

        let id = fx.manager.ensure_window("a@x.com", &logger).await.unwrap();
        assert!(id.starts_with("new-"));
        assert!(fx.vendor.calls().contains(&"delete:w-desktop".to_string()));
        assert!(!fx.vendor.ids().contains(&"w-desktop".to_string()));
    }

    #[tokio::test]
    async fn test_quota_evicts_exactly_the_oldest_inactive_window() {
        let fx = fixture(vec![
            window("w-busy", Some("busy@x.com"), 1, DeviceClass::Mobile),
            window("w-idle", Some("idle@x.com"), 2, DeviceClass::Mobile),
        ]);
        fx.db.set_setting("window_limit", "2").unwrap();
        add_account(&fx.db, "a@x.com");
        add_account(&fx.db, "busy@x.com");
        add_account(&fx.db, "idle@x.com");
        fx.db.save_window_binding("busy@x.com", "w-busy", None).unwrap();
        fx.db.save_window_binding("idle@x.com", "w-idle", None).unwrap();

        // busy@x.com has live progress in some task; idle@x.com does not.
        fx.tracker.init_accounts("t1", &["busy@x.com".to_string()]);

        let logger = fx.logger();
        let id = fx.manager.ensure_window("a@x.com", &logger).await.unwrap();
        assert!(id.starts_with("new-"));

        assert!(fx.vendor.calls().contains(&"delete:w-idle".to_string()));
        assert!(fx.vendor.ids().contains(&"w-busy".to_string()));
        // The evicted window's owner lost its binding.
        let idle = fx.db.get_account("idle@x.com").unwrap().unwrap();
        assert!(idle.window_id.is_none());
    }

    #[tokio::test]
    async fn test_quota_with_no_evictable_window_fails() {
        let fx = fixture(vec![
            window("w1", Some("b@x.com"), 1, DeviceClass::Mobile),
            window("w2", Some("c@x.com"), 2, DeviceClass::Mobile),
        ]);
        fx.db.set_setting("window_limit", "2").unwrap();
        add_account(&fx.db, "a@x.com");
        add_account(&fx.db, "b@x.com");
        add_account(&fx.db, "c@x.com");
        fx.db.save_window_binding("b@x.com", "w1", None).unwrap();
        fx.db.save_window_binding("c@x.com", "w2", None).unwrap();
        fx.tracker
            .init_accounts("t1", &["b@x.com".to_string(), "c@x.com".to_string()]);

        let logger = fx.logger();
        assert!(fx.manager.ensure_window("a@x.com", &logger).await.is_none());
        // Nothing was deleted or created.
        let calls = fx.vendor.calls();
        assert!(calls.iter().all(|c| !c.starts_with("create") && !c.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_duplicate_binding_guard_refuses_to_create() {
        // A window already carries this account's username but the db has
        // no binding for it (e.g. created out-of-band).
        let fx = fixture(vec![
            window("w-dup", Some("a@x.com"), 1, DeviceClass::Desktop),
            window("tpl", None, 2, DeviceClass::Mobile),
        ]);
        add_account(&fx.db, "a@x.com");
        let logger = fx.logger();

        assert!(fx.manager.ensure_window("a@x.com", &logger).await.is_none());
        assert!(fx.vendor.calls().iter().all(|c| !c.starts_with("create")));
    }

    #[tokio::test]
    async fn test_restore_from_cached_config() {
        let fx = fixture(vec![window("w-cached", Some("a@x.com"), 1, DeviceClass::Mobile)]);
        add_account(&fx.db, "a@x.com");
        // Binding cleared, but the cached config still references the
        // window.
        fx.db
            .save_window_binding("a@x.com", "w-cached", Some(r#"{"id":"w-cached"}"#))
            .unwrap();
        fx.db.clear_window_binding("a@x.com").unwrap();

        let logger = fx.logger();
        let id = fx.manager.ensure_window("a@x.com", &logger).await;
        assert_eq!(id.as_deref(), Some("w-cached"));
        // Binding was re-persisted.
        let account = fx.db.get_account("a@x.com").unwrap().unwrap();
        assert_eq!(account.window_id.as_deref(), Some("w-cached"));
    }
}
