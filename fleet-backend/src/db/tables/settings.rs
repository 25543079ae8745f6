//! Key/value settings table: runtime tunables edited over the REST API.

use rusqlite::{OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};

use super::super::Database;

/// Default cap on live vendor windows.
pub const DEFAULT_WINDOW_LIMIT: usize = 50;

/// Payment card fields consumed by the age-verification and card-binding
/// workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardInfo {
    pub number: String,
    pub exp_month: String,
    pub exp_year: String,
    pub cvv: String,
    pub zip: String,
}

impl CardInfo {
    /// A card without a number is treated as absent.
    pub fn is_complete(&self) -> bool {
        !self.number.is_empty()
    }
}

impl Database {
    pub fn get_setting(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqliteResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }

    /// Window quota; unparseable or non-positive values fall back to the
    /// default.
    pub fn window_limit(&self) -> usize {
        let value = self.get_setting("window_limit").ok().flatten();
        match value.as_deref().map(str::parse::<i64>) {
            Some(Ok(limit)) if limit > 0 => limit as usize,
            _ => DEFAULT_WINDOW_LIMIT,
        }
    }

    pub fn verification_api_key(&self) -> String {
        self.get_setting("verification_api_key")
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn card_info(&self) -> CardInfo {
        let get = |key: &str| self.get_setting(key).ok().flatten().unwrap_or_default();
        CardInfo {
            number: get("card_number"),
            exp_month: get("card_exp_month"),
            exp_year: get("card_exp_year"),
            cvv: get("card_cvv"),
            zip: get("card_zip"),
        }
    }
}
