pub mod builder;
pub mod cache;
pub mod industry;
pub mod scheduler;

pub use builder::SnapshotBuilder;
pub use cache::SnapshotCache;
pub use industry::IndustryTable;
pub use scheduler::{RefreshScheduler, Trigger};

use crate::config::env_or;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether the refresh cycle advances and persists lease inactivity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseExpiry {
    /// Every cycle ticks all leases under the store writer lock and saves changes.
    EachCycle,
    /// Cycles only read the store; leases end on release or update.
    Disabled,
}

impl std::str::FromStr for LeaseExpiry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "each_cycle" => Ok(LeaseExpiry::EachCycle),
            "disabled" => Ok(LeaseExpiry::Disabled),
            other => anyhow::bail!("LEASE_EXPIRY must be each_cycle or disabled (got {other})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Sleep between scheduling decisions.
    pub tick: Duration,
    /// Bounds for the jittered interval between unforced cycles.
    pub interval_min: Duration,
    pub interval_max: Duration,
    pub auto_release_after: i64,
    pub lease_expiry: LeaseExpiry,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(15),
            interval_min: Duration::from_secs(12 * 60),
            interval_max: Duration::from_secs(16 * 60),
            auto_release_after: crate::storage::lock::DEFAULT_AUTO_RELEASE_AFTER,
            lease_expiry: LeaseExpiry::EachCycle,
        }
    }
}

impl RefreshOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();

        let lease_expiry = match std::env::var("LEASE_EXPIRY") {
            Ok(s) if !s.trim().is_empty() => s.parse()?,
            _ => d.lease_expiry,
        };

        let out = Self {
            tick: Duration::from_secs(env_or("REFRESH_TICK_SECS", d.tick.as_secs())),
            interval_min: Duration::from_secs(env_or(
                "REFRESH_INTERVAL_MIN_SECS",
                d.interval_min.as_secs(),
            )),
            interval_max: Duration::from_secs(env_or(
                "REFRESH_INTERVAL_MAX_SECS",
                d.interval_max.as_secs(),
            )),
            auto_release_after: env_or("LOCK_AUTO_RELEASE_AFTER", d.auto_release_after),
            lease_expiry,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.tick.is_zero(), "REFRESH_TICK_SECS must be >= 1");
        anyhow::ensure!(
            self.interval_min <= self.interval_max,
            "refresh interval min ({:?}) must not exceed max ({:?})",
            self.interval_min,
            self.interval_max
        );
        anyhow::ensure!(
            self.auto_release_after >= 0,
            "LOCK_AUTO_RELEASE_AFTER must be >= 0"
        );
        Ok(())
    }
}

/// Force-refresh request shared between API callers and the scheduler.
#[derive(Debug, Default)]
pub struct RefreshSignal {
    force: AtomicBool,
    quick: AtomicBool,
}

impl RefreshSignal {
    /// Takes effect on the next scheduling tick. A pending quick request stays quick.
    pub fn request(&self, quick: bool) {
        if quick {
            self.quick.store(true, Ordering::SeqCst);
        }
        self.force.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending request, returning its quick flag.
    pub fn take(&self) -> Option<bool> {
        if self.force.swap(false, Ordering::SeqCst) {
            Some(self.quick.swap(false, Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.force.load(Ordering::SeqCst)
    }
}
