//! Task execution engine.
//!
//! Runs one submitted task: a batch of accounts, each walked through the
//! requested workflows in fixed priority order. Accounts fan out over a
//! bounded worker pool; a single account is always serialized on its lane,
//! even across concurrently running tasks. Failures are contained per
//! account — one account failing a workflow never touches the others.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::db::{AccountUpdate, Database};
use crate::execution::{AccountLaneManager, TaskTracker};
use crate::gateway::{EventBroadcaster, EventPump, GatewayEvent, PumpHandle, TaskLogger};
use crate::models::{
    normalize_email, AccountProgressStatus, AccountStatus, TaskStatus, WorkflowKind,
};
use crate::vendor::WindowVendor;
use crate::windows::WindowManager;
use crate::workflows::{WorkflowContext, WorkflowOutcome, WorkflowSet};

/// Requested concurrency is clamped into this range.
const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 5;

/// Bind-card verification gate: how long to wait for the persisted
/// account status to reach verified/subscribed, and how often to look.
const VERIFICATION_WAIT: Duration = Duration::from_secs(60);
const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Stats {
    completed: usize,
    failed: usize,
}

pub struct TaskEngine {
    db: Arc<Database>,
    tracker: Arc<TaskTracker>,
    lanes: Arc<AccountLaneManager>,
    windows: Arc<WindowManager>,
    workflows: Arc<WorkflowSet>,
    vendor: Arc<dyn WindowVendor>,
    broadcaster: Arc<EventBroadcaster>,
    verification_wait: Duration,
    verification_poll_interval: Duration,
}

impl TaskEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        tracker: Arc<TaskTracker>,
        lanes: Arc<AccountLaneManager>,
        windows: Arc<WindowManager>,
        workflows: Arc<WorkflowSet>,
        vendor: Arc<dyn WindowVendor>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            db,
            tracker,
            lanes,
            windows,
            workflows,
            vendor,
            broadcaster,
            verification_wait: VERIFICATION_WAIT,
            verification_poll_interval: VERIFICATION_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_verification_timing(mut self, wait: Duration, interval: Duration) -> Self {
        self.verification_wait = wait;
        self.verification_poll_interval = interval;
        self
    }

    /// Execute one task to completion. The event pump lives exactly as
    /// long as this call; the per-task progress table is dropped on every
    /// exit path.
    pub async fn run(
        self: Arc<Self>,
        task_id: String,
        kinds: Vec<WorkflowKind>,
        emails: Vec<String>,
        close_after: bool,
        concurrency: usize,
    ) {
        let pump = EventPump::start(self.broadcaster.clone());

        self.run_inner(&task_id, kinds, emails, close_after, concurrency, &pump)
            .await;

        self.tracker.remove_progress(&task_id);
        pump.shutdown().await;
    }

    async fn run_inner(
        self: &Arc<Self>,
        task_id: &str,
        kinds: Vec<WorkflowKind>,
        emails: Vec<String>,
        close_after: bool,
        concurrency: usize,
        pump: &EventPump,
    ) {
        // Deduplicate, preserving first occurrence.
        let mut seen = HashSet::new();
        let unique_emails: Vec<String> = emails
            .iter()
            .map(|e| normalize_email(e))
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();
        let total = unique_emails.len();

        let ordered = WorkflowKind::order(&kinds);
        let display = ordered.first().copied().unwrap_or(WorkflowKind::Setup2fa);

        let concurrency = concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        let workers = if total == 0 {
            concurrency
        } else {
            concurrency.min(total)
        };

        self.tracker.init_accounts(task_id, &unique_emails);
        self.tracker.start(task_id, display, total);

        let handle = pump.handle();
        let logger = TaskLogger::new(handle.clone());
        let stats = Arc::new(Mutex::new(Stats::default()));

        let order_line = ordered
            .iter()
            .map(|k| k.label())
            .collect::<Vec<_>>()
            .join(" > ");
        logger
            .info(
                None,
                &format!("Workflow order: {} | concurrency: {}", order_line, workers),
            )
            .await;

        // Push the full pending snapshot before any worker starts, so
        // subscribers see every account immediately.
        send_overall(
            &self.tracker,
            task_id,
            display,
            TaskStatus::Running,
            total,
            &stats,
            &handle,
        )
        .await;
        for email in &unique_emails {
            send_account(
                &self.tracker,
                task_id,
                email,
                AccountProgressStatus::Pending,
                Some("Waiting"),
                None,
                total,
                &stats,
                &handle,
            )
            .await;
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_handles = Vec::with_capacity(total);

        for email in unique_emails {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let task_id = task_id.to_string();
            let ordered = ordered.clone();
            let stats = stats.clone();
            let handle = handle.clone();
            let logger = logger.clone();

            let worker_email = email.clone();
            let join = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("Worker semaphore should not be closed");
                engine
                    .process_account(
                        &task_id,
                        &worker_email,
                        &ordered,
                        close_after,
                        display,
                        total,
                        &stats,
                        &handle,
                        &logger,
                    )
                    .await;
            });
            join_handles.push((email, join));
        }

        for (email, join) in join_handles {
            if let Err(e) = join.await {
                // A panicked worker fails only its own account.
                log::error!("[ENGINE] Worker for {} crashed: {}", email, e);
                {
                    let mut stats = stats.lock();
                    stats.failed += 1;
                }
                send_account(
                    &self.tracker,
                    task_id,
                    &email,
                    AccountProgressStatus::Failed,
                    None,
                    Some(&format!("Worker crashed: {}", e)),
                    total,
                    &stats,
                    &handle,
                )
                .await;
            }
        }

        let (completed, failed) = {
            let stats = stats.lock();
            (stats.completed, stats.failed)
        };
        let summary = format!(
            "Task complete - succeeded: {}, failed: {}",
            completed, failed
        );
        self.tracker.finish(task_id, TaskStatus::Completed, &summary);
        handle
            .publish(GatewayEvent::task_progress(
                task_id,
                display,
                TaskStatus::Completed,
                total,
                total,
                Some(&summary),
            ))
            .await;
        log::info!("[ENGINE] Task {} finished: {}", task_id, summary);
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_account(
        &self,
        task_id: &str,
        email: &str,
        ordered: &[WorkflowKind],
        close_after: bool,
        display: WorkflowKind,
        total: usize,
        stats: &Arc<Mutex<Stats>>,
        handle: &PumpHandle,
        logger: &TaskLogger,
    ) {
        send_account(
            &self.tracker,
            task_id,
            email,
            AccountProgressStatus::Running,
            Some("Initializing"),
            Some(&format!("Processing {}", email)),
            total,
            stats,
            handle,
        )
        .await;
        logger.info(Some(email), "Starting").await;

        // Serialize on the account across all tasks.
        let _lane = self.lanes.acquire(email).await;

        let mut account_success = true;
        let mut failure_message: Option<String> = None;
        let link_requested = ordered.contains(&WorkflowKind::GetLink);
        let mut link_verified = false;

        for (idx, kind) in ordered.iter().enumerate() {
            let is_last = idx + 1 == ordered.len();
            // Only the account's last workflow may close the window.
            let workflow_close_after = close_after && is_last;
            let label = kind.label();

            send_account(
                &self.tracker,
                task_id,
                email,
                AccountProgressStatus::Running,
                Some(label),
                None,
                total,
                stats,
                handle,
            )
            .await;
            logger
                .info(Some(email), &format!("Running workflow: {}", label))
                .await;

            // Card binding requires the identity verification started by
            // the link workflow to have landed in the store.
            if *kind == WorkflowKind::BindCard && link_requested && !link_verified {
                match self.wait_for_verification(email, logger).await {
                    Ok(()) => link_verified = true,
                    Err(last_status) => {
                        let message =
                            format!("Verification did not complete, status: {}", last_status);
                        logger
                            .error(Some(email), &format!("{} failed: {}", label, message))
                            .await;
                        account_success = false;
                        failure_message = Some(message);
                        break;
                    }
                }
            }

            let outcome = self
                .execute_workflow(*kind, email, workflow_close_after, logger)
                .await;

            if outcome.success {
                let detail = if outcome.message.is_empty() {
                    "success"
                } else {
                    outcome.message.as_str()
                };
                logger
                    .info(Some(email), &format!("{} finished: {}", label, detail))
                    .await;

                if *kind == WorkflowKind::GetLink {
                    // The link workflow starts verification; it counts as
                    // confirmed only once the store says so. Otherwise the
                    // bind-card gate above waits for it.
                    link_verified = self.is_verified(email);
                }
            } else {
                let detail = if outcome.message.is_empty() {
                    "unknown error"
                } else {
                    outcome.message.as_str()
                };
                logger
                    .error(Some(email), &format!("{} failed: {}", label, detail))
                    .await;
                account_success = false;
                failure_message = Some(outcome.message);
                break;
            }
        }

        if close_after {
            self.close_account_window(email, logger).await;
        }

        if account_success {
            {
                let mut stats = stats.lock();
                stats.completed += 1;
            }
            send_account(
                &self.tracker,
                task_id,
                email,
                AccountProgressStatus::Completed,
                None,
                Some("Done"),
                total,
                stats,
                handle,
            )
            .await;
        } else {
            {
                let mut stats = stats.lock();
                stats.failed += 1;
            }
            send_account(
                &self.tracker,
                task_id,
                email,
                AccountProgressStatus::Failed,
                None,
                failure_message.as_deref().or(Some("Failed")),
                total,
                stats,
                handle,
            )
            .await;
        }

        send_overall(
            &self.tracker,
            task_id,
            display,
            TaskStatus::Running,
            total,
            stats,
            handle,
        )
        .await;
    }

    /// Run one workflow: window first, then the executor, then the
    /// persistence side effects its result demands.
    async fn execute_workflow(
        &self,
        kind: WorkflowKind,
        email: &str,
        close_after: bool,
        logger: &TaskLogger,
    ) -> WorkflowOutcome {
        let window_id = match self.windows.ensure_window(email, logger).await {
            Some(id) => id,
            None => {
                return WorkflowOutcome::fail("Account not found or window could not be created")
            }
        };

        let executor = match self.workflows.get(kind) {
            Some(executor) => executor,
            None => return WorkflowOutcome::fail(format!("No executor registered for {}", kind)),
        };

        let ctx = WorkflowContext {
            window_id,
            email: email.to_string(),
            close_after,
            args: self.workflow_args(kind),
            logger: logger.clone(),
        };

        let outcome = executor.execute(&ctx).await;

        match kind {
            // A 2FA setup may rotate the seed even when the run fails
            // afterwards; persist whatever the script enrolled.
            WorkflowKind::Setup2fa => {
                if let Some(secret) = outcome.new_secret.clone() {
                    self.persist_secret(email, secret);
                }
            }
            WorkflowKind::Reset2fa => {
                if outcome.success {
                    if let Some(secret) = outcome.new_secret.clone() {
                        self.persist_secret(email, secret);
                    }
                }
            }
            WorkflowKind::BindCard => {
                if outcome.success {
                    let update = AccountUpdate {
                        status: Some(AccountStatus::Subscribed),
                        ..Default::default()
                    };
                    if let Err(e) = self.db.upsert_account(email, update) {
                        log::warn!("[ENGINE] Failed to mark {} subscribed: {}", email, e);
                    }
                }
            }
            _ => {}
        }

        outcome
    }

    fn persist_secret(&self, email: &str, secret: String) {
        let update = AccountUpdate {
            secret_key: Some(secret),
            ..Default::default()
        };
        if let Err(e) = self.db.upsert_account(email, update) {
            log::warn!("[ENGINE] Failed to persist new secret for {}: {}", email, e);
        }
    }

    /// Workflow-specific arguments passed through to the executor.
    fn workflow_args(&self, kind: WorkflowKind) -> serde_json::Value {
        match kind {
            WorkflowKind::GetLink => serde_json::json!({
                "verification_api_key": self.db.verification_api_key(),
            }),
            WorkflowKind::AgeVerification | WorkflowKind::BindCard => {
                let card = self.db.card_info();
                if card.is_complete() {
                    serde_json::json!({ "card": card })
                } else {
                    serde_json::json!({ "card": null })
                }
            }
            _ => serde_json::Value::Null,
        }
    }

    fn is_verified(&self, email: &str) -> bool {
        matches!(
            self.db.get_account(email),
            Ok(Some(account))
                if matches!(
                    account.status,
                    AccountStatus::Verified | AccountStatus::Subscribed
                )
        )
    }

    /// Poll the store until the account reaches verified/subscribed, up
    /// to the configured ceiling. Returns the last observed status on
    /// timeout.
    async fn wait_for_verification(&self, email: &str, logger: &TaskLogger) -> Result<(), String> {
        logger
            .info(
                Some(email),
                &format!(
                    "Waiting for identity verification (up to {}s)",
                    self.verification_wait.as_secs()
                ),
            )
            .await;

        let deadline = tokio::time::Instant::now() + self.verification_wait;
        let mut last_status: Option<AccountStatus> = None;

        while tokio::time::Instant::now() < deadline {
            if let Ok(Some(account)) = self.db.get_account(email) {
                last_status = Some(account.status);
                if matches!(
                    account.status,
                    AccountStatus::Verified | AccountStatus::Subscribed
                ) {
                    return Ok(());
                }
            }
            tokio::time::sleep(self.verification_poll_interval).await;
        }

        Err(last_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string()))
    }

    /// Best-effort close of the account's window after its last workflow.
    async fn close_account_window(&self, email: &str, logger: &TaskLogger) {
        let window_id = match self.db.get_account(email) {
            Ok(Some(account)) => account.window_id,
            _ => None,
        };
        if let Some(window_id) = window_id {
            if self.vendor.close_window(&window_id).await {
                logger.info(Some(email), "Window closed").await;
            } else {
                logger.warn(Some(email), "Failed to close window").await;
            }
        }
    }
}

/// Update the registry counter and push the overall progress event.
async fn send_overall(
    tracker: &TaskTracker,
    task_id: &str,
    display: WorkflowKind,
    status: TaskStatus,
    total: usize,
    stats: &Mutex<Stats>,
    handle: &PumpHandle,
) {
    let (completed, failed) = {
        let stats = stats.lock();
        (stats.completed, stats.failed)
    };
    tracker.set_completed(task_id, completed + failed);
    handle
        .publish(GatewayEvent::task_progress(
            task_id,
            display,
            status,
            total,
            completed + failed,
            Some(&format!("Completed: {}, failed: {}", completed, failed)),
        ))
        .await;
}

/// Update one account's progress record and push the event.
#[allow(clippy::too_many_arguments)]
async fn send_account(
    tracker: &TaskTracker,
    task_id: &str,
    email: &str,
    status: AccountProgressStatus,
    current_workflow: Option<&str>,
    message: Option<&str>,
    total: usize,
    stats: &Mutex<Stats>,
    handle: &PumpHandle,
) {
    tracker.update_account(task_id, email, status, current_workflow, message);
    let (completed, failed) = {
        let stats = stats.lock();
        (stats.completed, stats.failed)
    };
    handle
        .publish(GatewayEvent::account_progress(
            task_id,
            email,
            status,
            current_workflow,
            message,
            total,
            completed,
            failed,
        ))
        .await;
}
