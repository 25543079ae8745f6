//! In-memory task registry, per-task account progress, and retention.
//!
//! All engine and controller state lives here behind two coarse locks:
//! the task table (progress + creation timestamps) and the per-task
//! account progress table. Terminal task entries are evicted after a
//! retention window; the sweep runs opportunistically on every listing
//! request rather than on a timer.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::{
    AccountProgress, AccountProgressStatus, TaskProgress, TaskStatus, WorkflowKind,
};

/// How long completed/failed tasks stay listed.
pub const TASK_RETENTION: Duration = Duration::from_secs(3600);

struct TaskEntry {
    progress: TaskProgress,
    created_at: Instant,
}

/// Tracks every live and recently finished task.
///
/// Injected into the engine, the window manager, and the controllers —
/// never a module-level singleton, so the engine stays testable in
/// isolation.
pub struct TaskTracker {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    /// task_id -> email -> progress. Entries are dropped when the engine
    /// finishes the task.
    progress: Mutex<HashMap<String, HashMap<String, AccountProgress>>>,
    retention: Duration,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::with_retention(TASK_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            retention,
        }
    }

    // ── task registry ────────────────────────────────────────────────

    /// Register a freshly submitted task as pending.
    pub fn register(&self, task_id: &str, task_type: WorkflowKind, total: usize) {
        let mut tasks = self.tasks.lock();
        tasks.insert(
            task_id.to_string(),
            TaskEntry {
                progress: TaskProgress {
                    task_id: task_id.to_string(),
                    task_type,
                    status: TaskStatus::Pending,
                    total,
                    completed: 0,
                    message: None,
                },
                created_at: Instant::now(),
            },
        );
    }

    /// Move a task to running; also fixes up the display type and total
    /// once the engine has deduplicated and ordered the request.
    pub fn start(&self, task_id: &str, task_type: WorkflowKind, total: usize) {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            if entry.progress.status.is_terminal() {
                return;
            }
            entry.progress.task_type = task_type;
            entry.progress.status = TaskStatus::Running;
            entry.progress.total = total;
            entry.progress.completed = 0;
        }
    }

    /// Update the running completed counter, clamped to the total.
    pub fn set_completed(&self, task_id: &str, completed: usize) {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            entry.progress.completed = completed.min(entry.progress.total);
        }
    }

    /// Terminal transition. Ignored when the task is already terminal —
    /// completed/failed states are final.
    pub fn finish(&self, task_id: &str, status: TaskStatus, message: &str) {
        if !status.is_terminal() {
            return;
        }
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get_mut(task_id) {
            if entry.progress.status.is_terminal() {
                return;
            }
            entry.progress.status = status;
            entry.progress.message = Some(message.to_string());
            if status == TaskStatus::Completed {
                entry.progress.completed = entry.progress.total;
            }
        }
    }

    /// Best-effort cancel: flips a non-terminal task to failed. In-flight
    /// workers are not interrupted and run to completion.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(task_id) {
            Some(entry) => {
                if !entry.progress.status.is_terminal() {
                    entry.progress.status = TaskStatus::Failed;
                    entry.progress.message = Some("Cancelled".to_string());
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskProgress> {
        self.tasks.lock().get(task_id).map(|e| e.progress.clone())
    }

    pub fn list(&self) -> Vec<TaskProgress> {
        let tasks = self.tasks.lock();
        let mut list: Vec<_> = tasks.values().map(|e| e.progress.clone()).collect();
        list.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        list
    }

    /// Drop terminal tasks older than the retention window. Returns the
    /// number of evicted entries.
    pub fn cleanup(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let retention = self.retention;
        let before = tasks.len();
        tasks.retain(|_, entry| {
            !(entry.progress.status.is_terminal() && entry.created_at.elapsed() > retention)
        });
        let removed = before - tasks.len();

        if removed > 0 {
            log::info!("[TRACKER] Evicted {} expired task(s)", removed);
            // Repair: drop progress tables whose task entry is gone.
            let mut progress = self.progress.lock();
            progress.retain(|task_id, _| tasks.contains_key(task_id));
        }

        removed
    }

    // ── per-task account progress ────────────────────────────────────

    /// Initialize every account of a task to pending, before any worker
    /// starts.
    pub fn init_accounts(&self, task_id: &str, emails: &[String]) {
        let mut progress = self.progress.lock();
        let table = emails
            .iter()
            .map(|email| (email.clone(), AccountProgress::pending(email.clone())))
            .collect();
        progress.insert(task_id.to_string(), table);
    }

    /// Advance one account's progress. Terminal account states are final
    /// within a task; later updates are ignored.
    pub fn update_account(
        &self,
        task_id: &str,
        email: &str,
        status: AccountProgressStatus,
        current_workflow: Option<&str>,
        message: Option<&str>,
    ) {
        let mut progress = self.progress.lock();
        if let Some(table) = progress.get_mut(task_id) {
            if let Some(entry) = table.get_mut(email) {
                if entry.status.is_terminal() {
                    return;
                }
                entry.status = status;
                entry.current_workflow = current_workflow.map(String::from);
                entry.message = message.map(String::from);
            }
        }
    }

    pub fn account_progress(&self, task_id: &str) -> Option<Vec<AccountProgress>> {
        let progress = self.progress.lock();
        progress.get(task_id).map(|table| {
            let mut list: Vec<_> = table.values().cloned().collect();
            list.sort_by(|a, b| a.email.cmp(&b.email));
            list
        })
    }

    /// Emails with a pending or running account entry in any live task.
    /// Their windows must never be evicted to free quota.
    pub fn active_emails(&self) -> HashSet<String> {
        let progress = self.progress.lock();
        progress
            .values()
            .flat_map(|table| table.values())
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| entry.email.clone())
            .collect()
    }

    /// Drop a task's account progress table on engine teardown.
    pub fn remove_progress(&self, task_id: &str) {
        self.progress.lock().remove(task_id);
    }

}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TaskTracker {
        TaskTracker::new()
    }

    #[test]
    fn test_status_is_monotonic() {
        let t = tracker();
        t.register("t1", WorkflowKind::Setup2fa, 2);
        t.start("t1", WorkflowKind::Setup2fa, 2);
        t.finish("t1", TaskStatus::Completed, "done");

        // A later failure cannot reopen a completed task.
        t.finish("t1", TaskStatus::Failed, "late failure");
        assert_eq!(t.get("t1").unwrap().status, TaskStatus::Completed);

        // Nor can it go back to running.
        t.start("t1", WorkflowKind::Setup2fa, 2);
        assert_eq!(t.get("t1").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let t = tracker();
        t.register("t1", WorkflowKind::GetLink, 3);
        t.start("t1", WorkflowKind::GetLink, 3);
        t.set_completed("t1", 7);
        assert_eq!(t.get("t1").unwrap().completed, 3);
    }

    #[test]
    fn test_cancel_flips_non_terminal_only() {
        let t = tracker();
        t.register("t1", WorkflowKind::BindCard, 1);
        t.start("t1", WorkflowKind::BindCard, 1);
        assert!(t.cancel("t1"));
        let progress = t.get("t1").unwrap();
        assert_eq!(progress.status, TaskStatus::Failed);
        assert_eq!(progress.message.as_deref(), Some("Cancelled"));

        t.register("t2", WorkflowKind::BindCard, 1);
        t.finish("t2", TaskStatus::Completed, "done");
        assert!(t.cancel("t2"));
        assert_eq!(t.get("t2").unwrap().status, TaskStatus::Completed);

        assert!(!t.cancel("missing"));
    }

    #[test]
    fn test_retention_evicts_only_old_terminal_tasks() {
        let t = TaskTracker::with_retention(Duration::from_millis(50));

        t.register("old-done", WorkflowKind::Setup2fa, 1);
        t.finish("old-done", TaskStatus::Completed, "done");
        t.register("old-running", WorkflowKind::Setup2fa, 1);
        t.start("old-running", WorkflowKind::Setup2fa, 1);

        std::thread::sleep(Duration::from_millis(80));

        t.register("fresh-done", WorkflowKind::Setup2fa, 1);
        t.finish("fresh-done", TaskStatus::Failed, "failed");

        let removed = t.cleanup();
        assert_eq!(removed, 1);
        assert!(t.get("old-done").is_none());
        assert!(t.get("fresh-done").is_some());
        assert!(t.get("old-running").is_some());
    }

    #[test]
    fn test_account_progress_never_regresses_from_terminal() {
        let t = tracker();
        t.register("t1", WorkflowKind::Setup2fa, 1);
        t.init_accounts("t1", &["a@x.com".to_string()]);

        t.update_account("t1", "a@x.com", AccountProgressStatus::Running, Some("2FA"), None);
        t.update_account(
            "t1",
            "a@x.com",
            AccountProgressStatus::Failed,
            None,
            Some("boom"),
        );
        t.update_account("t1", "a@x.com", AccountProgressStatus::Running, None, None);

        let progress = t.account_progress("t1").unwrap();
        assert_eq!(progress[0].status, AccountProgressStatus::Failed);
        assert_eq!(progress[0].message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_active_emails_spans_tasks_and_skips_terminal() {
        let t = tracker();
        t.init_accounts("t1", &["a@x.com".to_string(), "b@x.com".to_string()]);
        t.init_accounts("t2", &["c@x.com".to_string()]);

        t.update_account("t1", "b@x.com", AccountProgressStatus::Completed, None, None);

        let active = t.active_emails();
        assert!(active.contains("a@x.com"));
        assert!(!active.contains("b@x.com"));
        assert!(active.contains("c@x.com"));

        t.remove_progress("t2");
        assert!(!t.active_emails().contains("c@x.com"));
    }
}
