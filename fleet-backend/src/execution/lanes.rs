//! Account Lane Serialization
//!
//! At most one workflow sequence runs for a given account at any time,
//! even when concurrently submitted tasks both include that account.
//! Tasks fan out over accounts; lanes serialize within one account.
//!
//! Lanes are created lazily on first use and kept for the lifetime of the
//! process — the table is bounded by the number of distinct accounts ever
//! processed, which is small at the scale this service targets.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::models::normalize_email;

/// Maximum time an account lane can be held before warning
const LANE_HOLD_WARNING_SECS: u64 = 600;

/// Guard that releases the account lane when dropped
pub struct AccountLaneGuard {
    email: String,
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl AccountLaneGuard {
    /// Get the normalized email this guard is for
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Get how long this lane has been held
    pub fn held_duration(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for AccountLaneGuard {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if held.as_secs() > LANE_HOLD_WARNING_SECS {
            log::warn!(
                "[LANES] Account {} lane held for {} seconds (unusually long)",
                self.email,
                held.as_secs()
            );
        }
    }
}

/// Manages per-account lanes for workflow serialization
pub struct AccountLaneManager {
    /// One semaphore per account — permits = 1 means only one workflow
    /// sequence at a time
    lanes: DashMap<String, Arc<Semaphore>>,
}

impl AccountLaneManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lanes: DashMap::new(),
        })
    }

    /// Acquire the account's lane for exclusive access.
    ///
    /// Blocks while another task is already processing this account.
    /// Returns a guard that releases the lane when dropped.
    pub async fn acquire(&self, email: &str) -> AccountLaneGuard {
        let email = normalize_email(email);
        let semaphore = self.get_or_create_lane(&email);

        let permit = semaphore
            .acquire_owned()
            .await
            .expect("Account lane semaphore should not be closed");

        AccountLaneGuard {
            email,
            _permit: permit,
            acquired_at: Instant::now(),
        }
    }

    /// Try to acquire the account's lane without waiting.
    pub fn try_acquire(&self, email: &str) -> Option<AccountLaneGuard> {
        let email = normalize_email(email);
        let semaphore = self.get_or_create_lane(&email);

        semaphore.try_acquire_owned().ok().map(|permit| AccountLaneGuard {
            email,
            _permit: permit,
            acquired_at: Instant::now(),
        })
    }

    /// Check if an account currently has a workflow sequence running
    pub fn is_busy(&self, email: &str) -> bool {
        self.lanes
            .get(&normalize_email(email))
            .map(|s| s.available_permits() == 0)
            .unwrap_or(false)
    }

    /// Number of lanes ever created
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn get_or_create_lane(&self, email: &str) -> Arc<Semaphore> {
        self.lanes
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

impl Default for AccountLaneManager {
    fn default() -> Self {
        Self {
            lanes: DashMap::new(),
        }
    }
}
