//! Daily quota for the primary provider.

use std::sync::Mutex;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

/// Successful primary-provider generations on the current calendar day.
///
/// The counter resets lazily: [`roll_over`](Self::roll_over) is called at
/// the start of every request and zeroes the count once the date has moved
/// past `reset_date`. Nothing is persisted; a restart starts from zero.
#[derive(Debug)]
pub struct QuotaCounter {
    limit: u32,
    state: Mutex<QuotaState>,
}

#[derive(Debug, Clone, Copy)]
struct QuotaState {
    used: u32,
    reset_date: NaiveDate,
}

/// Point-in-time view of the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub limit: u32,
    pub reset_date: NaiveDate,
}

impl QuotaSnapshot {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

impl QuotaCounter {
    pub fn new(limit: u32, today: NaiveDate) -> Self {
        Self {
            limit,
            state: Mutex::new(QuotaState {
                used: 0,
                reset_date: today,
            }),
        }
    }

    /// Reset the count if `today` is a later date than the last reset.
    /// Returns whether a reset happened.
    pub fn roll_over(&self, today: NaiveDate) -> bool {
        let mut state = self.lock();
        if today <= state.reset_date {
            return false;
        }
        info!(
            previous_date = %state.reset_date,
            used = state.used,
            "resetting daily primary-provider quota"
        );
        state.used = 0;
        state.reset_date = today;
        true
    }

    pub fn has_remaining(&self) -> bool {
        self.lock().used < self.limit
    }

    /// Count one successful primary generation.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.used = state.used.saturating_add(1);
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let state = self.lock();
        QuotaSnapshot {
            used: state.used,
            limit: self.limit,
            reset_date: state.reset_date,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
