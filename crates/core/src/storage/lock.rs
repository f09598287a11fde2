use crate::domain::entry::{PortfolioEntry, LOCK_REFRESHING, LOCK_UNLOCKED};
use crate::error::CoreError;
use rand::Rng;

pub const DEFAULT_AUTO_RELEASE_AFTER: i64 = 3;

// Lease tokens are drawn from this range, so a valid token is always positive.
const TOKEN_RANGE: std::ops::Range<i64> = 1_000_000..1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked(i64),
    /// Only ever seen on a refresh-cycle copy.
    Refreshing,
}

impl LockState {
    pub fn of(entry: &PortfolioEntry) -> Self {
        match entry.lock_key {
            LOCK_UNLOCKED => LockState::Unlocked,
            k if k > 0 => LockState::Locked(k),
            _ => LockState::Refreshing,
        }
    }
}

/// Per-ticker editing lease. Operates on entries in place; persisting the
/// result is up to the caller.
#[derive(Debug, Clone, Copy)]
pub struct LockManager {
    auto_release_after: i64,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_RELEASE_AFTER)
    }
}

impl LockManager {
    pub fn new(auto_release_after: i64) -> Self {
        Self { auto_release_after }
    }

    pub fn auto_release_after(&self) -> i64 {
        self.auto_release_after
    }

    pub fn acquire(&self, entry: &mut PortfolioEntry) -> Result<i64, CoreError> {
        if let LockState::Locked(_) = LockState::of(entry) {
            return Err(CoreError::AlreadyLocked(entry.ticker.clone()));
        }

        let token = rand::thread_rng().gen_range(TOKEN_RANGE);
        entry.lock_key = token;
        entry.lock_counter = 0;
        Ok(token)
    }

    /// Returns whether the entry changed. Releasing an unlocked entry is a no-op.
    pub fn release(&self, entry: &mut PortfolioEntry, token: i64) -> Result<bool, CoreError> {
        match LockState::of(entry) {
            LockState::Unlocked => Ok(false),
            LockState::Locked(held) if held == token => {
                entry.lock_key = LOCK_UNLOCKED;
                entry.lock_counter = 0;
                Ok(true)
            }
            _ => Err(CoreError::TokenMismatch(entry.ticker.clone())),
        }
    }

    /// Checks that a protected change may proceed with `token`.
    pub fn verify(&self, entry: &PortfolioEntry, token: Option<i64>) -> Result<(), CoreError> {
        let LockState::Locked(held) = LockState::of(entry) else {
            return Err(CoreError::LockRequired(entry.ticker.clone()));
        };
        match token {
            None => Err(CoreError::LockRequired(entry.ticker.clone())),
            Some(t) if t != held => Err(CoreError::TokenMismatch(entry.ticker.clone())),
            Some(_) => Ok(()),
        }
    }

    /// Advances the inactivity counter by one pass. A lease held for more than
    /// `auto_release_after` passes is released. Returns whether anything changed.
    pub fn tick(&self, entry: &mut PortfolioEntry) -> bool {
        match LockState::of(entry) {
            LockState::Locked(_) => {
                entry.lock_counter += 1;
                if entry.lock_counter > self.auto_release_after {
                    tracing::info!(
                        ticker = %entry.ticker,
                        passes = entry.lock_counter,
                        "releasing lock due to inactivity"
                    );
                    entry.lock_key = LOCK_UNLOCKED;
                    entry.lock_counter = 0;
                }
                true
            }
            LockState::Refreshing => {
                entry.lock_key = LOCK_UNLOCKED;
                entry.lock_counter = 0;
                true
            }
            LockState::Unlocked => {
                let changed = entry.lock_counter != 0;
                entry.lock_counter = 0;
                changed
            }
        }
    }

    /// Rewrites a held entry's key to the refreshing sentinel on a refresh copy.
    /// Returns whether the entry was locked.
    pub fn mark_refreshing(&self, entry: &mut PortfolioEntry) -> bool {
        if entry.is_locked() {
            entry.lock_key = LOCK_REFRESHING;
            true
        } else {
            false
        }
    }
}
