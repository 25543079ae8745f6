//! Executor that delegates a workflow to an external automation script.
//!
//! The deployment ships one executable per workflow kind under the
//! configured scripts directory (`setup_2fa`, `reset_2fa`,
//! `age_verification`, `get_link`, `bind_card`). The script receives a
//! JSON payload on stdin:
//!
//! ```json
//! {"window_id": "...", "email": "...", "close_after": false, "args": {...}}
//! ```
//!
//! and prints progress lines to stdout, the last of which must be a JSON
//! object `{"success": bool, "message": "...", "new_secret": "..."}`.
//! Progress lines are forwarded to the task log stream; a missing script,
//! a crash, or malformed output becomes a failure outcome, never an
//! error.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{WorkflowContext, WorkflowExecutor, WorkflowOutcome};
use crate::models::WorkflowKind;

pub struct ExternalScriptExecutor {
    kind: WorkflowKind,
    script: PathBuf,
}

impl ExternalScriptExecutor {
    pub fn new(kind: WorkflowKind, scripts_dir: &Path) -> Self {
        Self {
            kind,
            script: scripts_dir.join(kind.as_str()),
        }
    }

    /// Split captured stdout into progress lines and the trailing JSON
    /// result.
    fn parse_output(stdout: &str) -> (Vec<&str>, Option<WorkflowOutcome>) {
        let lines: Vec<&str> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        match lines.split_last() {
            Some((last, rest)) => {
                let outcome = serde_json::from_str::<WorkflowOutcome>(last).ok();
                if outcome.is_some() {
                    (rest.to_vec(), outcome)
                } else {
                    (lines, None)
                }
            }
            None => (Vec::new(), None),
        }
    }
}

#[async_trait]
impl WorkflowExecutor for ExternalScriptExecutor {
    async fn execute(&self, ctx: &WorkflowContext) -> WorkflowOutcome {
        if !self.script.exists() {
            return WorkflowOutcome::fail(format!(
                "Automation script not found: {}",
                self.script.display()
            ));
        }

        let payload = serde_json::json!({
            "window_id": ctx.window_id,
            "email": ctx.email,
            "close_after": ctx.close_after,
            "args": ctx.args,
        });

        let mut child = match tokio::process::Command::new(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return WorkflowOutcome::fail(format!(
                    "Failed to launch {} script: {}",
                    self.kind, e
                ));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload.to_string().as_bytes()).await {
                log::warn!("[WORKFLOW] Failed to write payload to {} script: {}", self.kind, e);
            }
            // Close stdin so the script sees EOF.
        }

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return WorkflowOutcome::fail(format!("{} script failed: {}", self.kind, e));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (progress_lines, outcome) = Self::parse_output(&stdout);

        for line in progress_lines {
            ctx.logger.info(Some(&ctx.email), line).await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no error output");
            return WorkflowOutcome::fail(format!(
                "{} script exited with {}: {}",
                self.kind, output.status, detail
            ));
        }

        match outcome {
            Some(outcome) => outcome,
            None => WorkflowOutcome::fail(format!(
                "{} script produced no result line",
                self.kind
            )),
        }
    }
}
