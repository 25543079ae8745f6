//! Account table operations.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use super::super::Database;
use crate::models::{normalize_email, Account, AccountStatus};

/// Partial update applied by `upsert_account`; `None` fields keep the
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub password: Option<String>,
    pub recovery_email: Option<String>,
    pub secret_key: Option<String>,
    pub verification_link: Option<String>,
    pub status: Option<AccountStatus>,
    pub message: Option<String>,
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    let status: String = row.get("status")?;
    let updated_at: Option<String> = row.get("updated_at")?;
    Ok(Account {
        email: row.get("email")?,
        password: row.get("password")?,
        recovery_email: row.get("recovery_email")?,
        secret_key: row.get("secret_key")?,
        verification_link: row.get("verification_link")?,
        status: AccountStatus::parse(&status).unwrap_or(AccountStatus::Pending),
        message: row.get("message")?,
        window_id: row.get("window_id")?,
        window_config: row.get("window_config")?,
        updated_at: updated_at
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

const ACCOUNT_COLUMNS: &str = "email, password, recovery_email, secret_key, verification_link, \
     status, message, window_id, window_config, updated_at";

impl Database {
    pub fn get_account(&self, email: &str) -> SqliteResult<Option<Account>> {
        let email = normalize_email(email);
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM accounts WHERE email = ?1", ACCOUNT_COLUMNS),
            [&email],
            row_to_account,
        )
        .optional()
    }

    pub fn list_accounts(&self) -> SqliteResult<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY email",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_account)?;
        rows.collect()
    }

    /// Insert the account if new, otherwise merge the provided fields
    /// into the stored row.
    pub fn upsert_account(&self, email: &str, update: AccountUpdate) -> SqliteResult<()> {
        let email = normalize_email(email);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO accounts (email, password, recovery_email, secret_key, verification_link, status, message, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'pending'), ?7, ?8)
             ON CONFLICT(email) DO UPDATE SET
                password = COALESCE(excluded.password, password),
                recovery_email = COALESCE(excluded.recovery_email, recovery_email),
                secret_key = COALESCE(excluded.secret_key, secret_key),
                verification_link = COALESCE(excluded.verification_link, verification_link),
                status = COALESCE(?6, status),
                message = COALESCE(excluded.message, message),
                updated_at = excluded.updated_at",
            rusqlite::params![
                email,
                update.password,
                update.recovery_email,
                update.secret_key,
                update.verification_link,
                update.status.map(|s| s.as_str()),
                update.message,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn delete_account(&self, email: &str) -> SqliteResult<bool> {
        let email = normalize_email(email);
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM accounts WHERE email = ?1", [&email])?;
        Ok(changed > 0)
    }

    /// Drop the account's window binding, keeping the cached config so a
    /// later restore can still find the old window.
    pub fn clear_window_binding(&self, email: &str) -> SqliteResult<()> {
        let email = normalize_email(email);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "UPDATE accounts SET window_id = NULL, updated_at = ?2 WHERE email = ?1",
            rusqlite::params![email, now],
        )?;
        Ok(())
    }

    /// Persist a window binding together with the window's full config
    /// (the secondary cache used by window restore).
    pub fn save_window_binding(
        &self,
        email: &str,
        window_id: &str,
        window_config: Option<&str>,
    ) -> SqliteResult<()> {
        let email = normalize_email(email);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "UPDATE accounts
             SET window_id = ?2,
                 window_config = COALESCE(?3, window_config),
                 updated_at = ?4
             WHERE email = ?1",
            rusqlite::params![email, window_id, window_config, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::test_database;

    #[test]
    fn test_upsert_and_get_is_case_insensitive() {
        let (db, _dir) = test_database();
        db.upsert_account(
            "User@Example.com",
            AccountUpdate {
                password: Some("pw".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let account = db.get_account("  user@EXAMPLE.com ").unwrap().unwrap();
        assert_eq!(account.email, "user@example.com");
        assert_eq!(account.password.as_deref(), Some("pw"));
        assert_eq!(account.status, AccountStatus::Pending);
    }

    #[test]
    fn test_upsert_merges_fields() {
        let (db, _dir) = test_database();
        db.upsert_account(
            "a@x.com",
            AccountUpdate {
                password: Some("pw".to_string()),
                secret_key: Some("OLDSECRET".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        db.upsert_account(
            "a@x.com",
            AccountUpdate {
                secret_key: Some("NEWSECRET".to_string()),
                status: Some(AccountStatus::Verified),
                ..Default::default()
            },
        )
        .unwrap();

        let account = db.get_account("a@x.com").unwrap().unwrap();
        assert_eq!(account.password.as_deref(), Some("pw"));
        assert_eq!(account.secret_key.as_deref(), Some("NEWSECRET"));
        assert_eq!(account.status, AccountStatus::Verified);
    }

    #[test]
    fn test_window_binding_lifecycle() {
        let (db, _dir) = test_database();
        db.upsert_account("a@x.com", AccountUpdate::default()).unwrap();

        db.save_window_binding("a@x.com", "w-123", Some("{\"id\":\"w-123\"}"))
            .unwrap();
        let account = db.get_account("a@x.com").unwrap().unwrap();
        assert_eq!(account.window_id.as_deref(), Some("w-123"));
        assert!(account.window_config.is_some());

        db.clear_window_binding("a@x.com").unwrap();
        let account = db.get_account("a@x.com").unwrap().unwrap();
        assert!(account.window_id.is_none());
        // Config survives a clear so restore can re-check the old window.
        assert!(account.window_config.is_some());
    }

    #[test]
    fn test_missing_account_is_none() {
        let (db, _dir) = test_database();
        assert!(db.get_account("ghost@x.com").unwrap().is_none());
    }
}
