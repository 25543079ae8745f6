use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical form of an account email: trimmed and lowercased.
/// Emails are the unique account key everywhere (store, lanes, window
/// bindings), so every lookup normalizes first.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Lifecycle status of a managed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    LinkReady,
    Verified,
    Subscribed,
    Ineligible,
    Error,
    Running,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::LinkReady => "link_ready",
            AccountStatus::Verified => "verified",
            AccountStatus::Subscribed => "subscribed",
            AccountStatus::Ineligible => "ineligible",
            AccountStatus::Error => "error",
            AccountStatus::Running => "running",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AccountStatus::Pending),
            "link_ready" => Some(AccountStatus::LinkReady),
            "verified" => Some(AccountStatus::Verified),
            "subscribed" => Some(AccountStatus::Subscribed),
            "ineligible" => Some(AccountStatus::Ineligible),
            "error" => Some(AccountStatus::Error),
            "running" => Some(AccountStatus::Running),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An account row from the persistent store.
///
/// The store owns the schema; the orchestration core only reads identity,
/// credentials, lifecycle status, and the window binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub password: Option<String>,
    pub recovery_email: Option<String>,
    pub secret_key: Option<String>,
    pub verification_link: Option<String>,
    pub status: AccountStatus,
    pub message: Option<String>,
    pub window_id: Option<String>,
    pub window_config: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
