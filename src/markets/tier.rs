//! Tier data model (§3): a contiguous page range refreshed on its own
//! schedule, plus the in-memory shadow the updater uses to decide when
//! to refresh and to detect stuck updates.

use std::time::{Duration, Instant};

use crate::config::TierConfig;

#[derive(Debug, Clone)]
pub struct Tier {
    pub name: String,
    pub page_from: u32,
    pub page_to: u32,
    pub update_interval: Duration,
    pub fetch_extras: bool,
}

impl From<&TierConfig> for Tier {
    fn from(c: &TierConfig) -> Self {
        Self {
            name: c.name.clone(),
            page_from: c.page_from,
            page_to: c.page_to,
            update_interval: c.update_interval,
            fetch_extras: c.fetch_extras,
        }
    }
}

/// {coin records for that tier, last-completed timestamp, optional
/// in-flight start timestamp}.
#[derive(Debug, Default, Clone)]
pub struct TierCacheEntry {
    pub record_ids: Vec<String>,
    pub last_completed: Option<Instant>,
    pub in_flight_since: Option<Instant>,
    pub initially_loaded: bool,
}

impl TierCacheEntry {
    /// "no successful update has ever completed and no refresh is currently
    /// in flight, or no refresh is currently in flight **and** now −
    /// last-completed ≥ update_interval". The "no refresh in flight"
    /// condition applies to both branches: a tier whose first refresh is
    /// still running must not get a second one spawned alongside it.
    pub fn needs_refresh(&self, update_interval: Duration) -> bool {
        match self.last_completed {
            None => self.in_flight_since.is_none(),
            Some(last) => self.in_flight_since.is_none() && last.elapsed() >= update_interval,
        }
    }

    /// An in-flight refresh older than max(10 min, 3*interval) is stuck.
    pub fn is_stuck(&self, update_interval: Duration) -> bool {
        let threshold = Duration::from_secs(600).max(update_interval * 3);
        match self.in_flight_since {
            Some(started) => started.elapsed() > threshold,
            None => false,
        }
    }
}
