//! Wire events pushed to WebSocket subscribers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{AccountProgressStatus, TaskStatus, WorkflowKind};

/// An event on the subscriber stream: a name plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: Value,
}

impl GatewayEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    /// Progress of one account within a task, including the running
    /// totals so subscribers never need a second lookup.
    #[allow(clippy::too_many_arguments)]
    pub fn account_progress(
        task_id: &str,
        email: &str,
        status: AccountProgressStatus,
        current_workflow: Option<&str>,
        message: Option<&str>,
        total: usize,
        completed: usize,
        failed: usize,
    ) -> Self {
        Self::new(
            "account_progress",
            json!({
                "task_id": task_id,
                "email": email,
                "status": status,
                "current_workflow": current_workflow,
                "message": message,
                "total": total,
                "completed": completed,
                "failed": failed,
            }),
        )
    }

    /// Overall progress of a task.
    pub fn task_progress(
        task_id: &str,
        task_type: WorkflowKind,
        status: TaskStatus,
        total: usize,
        completed: usize,
        message: Option<&str>,
    ) -> Self {
        Self::new(
            "task_progress",
            json!({
                "task_id": task_id,
                "task_type": task_type,
                "status": status,
                "total": total,
                "completed": completed,
                "message": message,
            }),
        )
    }

    /// A log line, optionally scoped to one account.
    pub fn log(level: &str, message: &str, email: Option<&str>) -> Self {
        Self::new(
            "log",
            json!({
                "level": level,
                "message": message,
                "email": email,
            }),
        )
    }
}
