use serde::{Deserialize, Serialize};

/// One discrete automation workflow executed against a window for one
/// account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKind {
    #[serde(rename = "setup_2fa")]
    Setup2fa,
    #[serde(rename = "reset_2fa")]
    Reset2fa,
    #[serde(rename = "age_verification")]
    AgeVerification,
    #[serde(rename = "get_link")]
    GetLink,
    #[serde(rename = "bind_card")]
    BindCard,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Setup2fa => "setup_2fa",
            WorkflowKind::Reset2fa => "reset_2fa",
            WorkflowKind::AgeVerification => "age_verification",
            WorkflowKind::GetLink => "get_link",
            WorkflowKind::BindCard => "bind_card",
        }
    }

    /// Human label shown in progress events.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowKind::Setup2fa => "Set up 2FA",
            WorkflowKind::Reset2fa => "Reset 2FA",
            WorkflowKind::AgeVerification => "Age verification",
            WorkflowKind::GetLink => "Retrieve link",
            WorkflowKind::BindCard => "Bind card",
        }
    }

    /// Fixed execution priority: 2FA work first, card binding last.
    pub fn priority(&self) -> u8 {
        match self {
            WorkflowKind::Setup2fa | WorkflowKind::Reset2fa => 0,
            WorkflowKind::AgeVerification => 1,
            WorkflowKind::GetLink => 2,
            WorkflowKind::BindCard => 3,
        }
    }

    /// Order a requested workflow list by priority; ties keep the
    /// caller's order (stable sort).
    pub fn order(kinds: &[WorkflowKind]) -> Vec<WorkflowKind> {
        let mut ordered = kinds.to_vec();
        ordered.sort_by_key(|k| k.priority());
        ordered
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal states are final; nothing transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live progress record for one task, held by the in-memory registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    /// Display workflow kind: the highest-priority kind requested.
    pub task_type: WorkflowKind,
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    #[serde(default)]
    pub message: Option<String>,
}

/// Per-account status within one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountProgressStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AccountProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountProgressStatus::Pending => "pending",
            AccountProgressStatus::Running => "running",
            AccountProgressStatus::Completed => "completed",
            AccountProgressStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AccountProgressStatus::Completed | AccountProgressStatus::Failed
        )
    }
}

impl std::fmt::Display for AccountProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live progress record for one (task, account) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProgress {
    pub email: String,
    pub status: AccountProgressStatus,
    #[serde(default)]
    pub current_workflow: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AccountProgress {
    pub fn pending(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            status: AccountProgressStatus::Pending,
            current_workflow: None,
            message: None,
        }
    }
}
