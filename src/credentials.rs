//! Credential pool (§3, §4.1).
//!
//! Enumerates usable upstream credentials in priority order and tracks
//! per-credential failure backoff. Loaded once at startup from `Config` and
//! immutable thereafter; failure state is the only thing that changes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    Primary,
    Secondary,
    Anonymous,
}

/// A single credential: its kind plus the value carried on the wire.
/// Anonymous is always represented by an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub kind: CredentialKind,
    pub value: String,
}

impl Credential {
    pub fn anonymous() -> Self {
        Self {
            kind: CredentialKind::Anonymous,
            value: String::new(),
        }
    }
}

const DEFAULT_BACKOFF_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Holds the configured credential lists and the last-failure timestamp for
/// each credential value. Concurrent-safe: reads dominate, so the failure
/// map is behind a reader/writer lock.
pub struct CredentialPool {
    primary: Vec<String>,
    secondary: Vec<String>,
    backoff_window: Duration,
    last_failure: RwLock<HashMap<String, Instant>>,
}

impl CredentialPool {
    pub fn new(config: &Config) -> Self {
        Self::with_backoff_window(config, DEFAULT_BACKOFF_WINDOW)
    }

    pub fn with_backoff_window(config: &Config, backoff_window: Duration) -> Self {
        Self {
            primary: config.credentials.primary.clone(),
            secondary: config.credentials.secondary.clone(),
            backoff_window,
            last_failure: RwLock::new(HashMap::new()),
        }
    }

    fn in_backoff(&self, value: &str) -> bool {
        let map = self.last_failure.read();
        match map.get(value) {
            Some(at) => at.elapsed() < self.backoff_window,
            None => false,
        }
    }

    /// Returns the ordered availability list: Primary-usable*,
    /// Secondary-usable*, Anonymous. Invariant (b): if exactly one Primary
    /// is configured it is always offered, backoff or not, since a single
    /// key must never self-block.
    pub fn available_credentials(&self) -> Vec<Credential> {
        let mut out = Vec::with_capacity(self.primary.len() + self.secondary.len() + 1);

        if self.primary.len() == 1 {
            out.push(Credential {
                kind: CredentialKind::Primary,
                value: self.primary[0].clone(),
            });
        } else {
            for value in &self.primary {
                if !self.in_backoff(value) {
                    out.push(Credential {
                        kind: CredentialKind::Primary,
                        value: value.clone(),
                    });
                }
            }
        }

        for value in &self.secondary {
            if !self.in_backoff(value) {
                out.push(Credential {
                    kind: CredentialKind::Secondary,
                    value: value.clone(),
                });
            }
        }

        out.push(Credential::anonymous());
        out
    }

    /// Marks `value` as failed as of now. Invariant (a): the empty
    /// (Anonymous) value is never recorded, since Anonymous cannot be
    /// excluded from availability.
    pub fn mark_failed(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        self.last_failure.write().insert(value.to_string(), Instant::now());
    }
}
