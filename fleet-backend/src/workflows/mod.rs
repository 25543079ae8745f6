//! Workflow dispatch: a closed mapping from workflow kind to the executor
//! capability that runs it against a window.
//!
//! The concrete automation (Playwright/Selenium scripts driving the
//! window) lives outside this service; executors are the narrow seam it
//! is consumed through. Dispatch is by enum tag — never by name lookup.

pub mod external;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::gateway::TaskLogger;
use crate::models::WorkflowKind;

/// Result of one workflow execution: success flag, human-readable
/// message, and an optional rotated 2FA secret to persist.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub new_secret: Option<String>,
}

impl WorkflowOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            new_secret: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            new_secret: None,
        }
    }
}

/// Everything an executor needs for one run.
pub struct WorkflowContext {
    pub window_id: String,
    pub email: String,
    /// Close the window when this workflow finishes. Only ever true for
    /// the last workflow in an account's ordered list.
    pub close_after: bool,
    /// Workflow-specific arguments (verification API key, card fields).
    pub args: serde_json::Value,
    pub logger: TaskLogger,
}

/// Executor capability for one workflow kind.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(&self, ctx: &WorkflowContext) -> WorkflowOutcome;
}

/// Static tag → executor mapping built once at startup.
pub struct WorkflowSet {
    executors: HashMap<WorkflowKind, Arc<dyn WorkflowExecutor>>,
}

impl WorkflowSet {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: WorkflowKind, executor: Arc<dyn WorkflowExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn get(&self, kind: WorkflowKind) -> Option<Arc<dyn WorkflowExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// The production set: one external automation script per kind,
    /// resolved under `scripts_dir`.
    pub fn external(scripts_dir: &std::path::Path) -> Self {
        let mut set = Self::new();
        for kind in [
            WorkflowKind::Setup2fa,
            WorkflowKind::Reset2fa,
            WorkflowKind::AgeVerification,
            WorkflowKind::GetLink,
            WorkflowKind::BindCard,
        ] {
            set = set.register(
                kind,
                Arc::new(external::ExternalScriptExecutor::new(kind, scripts_dir)),
            );
        }
        set
    }
}

impl Default for WorkflowSet {
    fn default() -> Self {
        Self::new()
    }
}
