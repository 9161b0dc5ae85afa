//! Token-bucket rate limiter and the registry that keys limiters by
//! credential (§3, §4.2).

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, RateLimitSetting};
use crate::credentials::CredentialKind;
use crate::error::ExecError;

/// Deadline a caller threads through blocking operations. `None` means wait
/// indefinitely; mirrors "a context object" from §5 without pulling in a
/// full cancellation-token abstraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    pub deadline: Option<Instant>,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn none() -> Self {
        Self { deadline: None }
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl BucketState {
    fn new(refill_per_sec: f64, capacity: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Returns Some(0) if a token was granted, or Some(wait_secs) if the
    /// caller must sleep that long before trying again.
    fn try_acquire(&mut self) -> f64 {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            0.0
        } else if self.refill_per_sec <= 0.0 {
            f64::INFINITY
        } else {
            (1.0 - self.tokens) / self.refill_per_sec
        }
    }
}

/// A token bucket sized from requests-per-minute and burst.
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(setting: RateLimitSetting) -> Self {
        let refill_per_sec = setting.requests_per_minute as f64 / 60.0;
        Self {
            state: Mutex::new(BucketState::new(refill_per_sec, setting.burst as f64)),
        }
    }

    /// Waits for a single token, respecting `ctx`'s deadline. Cancellable:
    /// if the deadline elapses before a token is available, returns
    /// `ExecError::Cancelled` without ever reporting success.
    pub async fn acquire(&self, ctx: &CallContext) -> Result<(), ExecError> {
        loop {
            let wait_secs = {
                let mut state = self.state.lock();
                state.try_acquire()
            };

            if wait_secs <= 0.0 {
                return Ok(());
            }

            let wait = if wait_secs.is_finite() {
                Duration::from_secs_f64(wait_secs)
            } else {
                Duration::from_secs(3600)
            };

            match ctx.remaining() {
                Some(remaining) if remaining.is_zero() => return Err(ExecError::Cancelled),
                Some(remaining) => {
                    let sleep_for = wait.min(remaining);
                    tokio::time::sleep(sleep_for).await;
                    if sleep_for < wait {
                        return Err(ExecError::Cancelled);
                    }
                }
                None => tokio::time::sleep(wait).await,
            }
        }
    }

    #[cfg(test)]
    fn available_permits(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(Instant::now());
        state.tokens
    }
}

/// Lookup key: a request's credential identifies which limiter it draws
/// from. Two requests with the same (kind, value) share a limiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LimiterKey {
    kind_tag: u8,
    value: String,
}

impl LimiterKey {
    fn new(kind: CredentialKind, value: &str) -> Self {
        let kind_tag = match kind {
            CredentialKind::Primary => 0,
            CredentialKind::Secondary => 1,
            CredentialKind::Anonymous => 2,
        };
        Self {
            kind_tag,
            value: value.to_string(),
        }
    }

    fn kind(&self) -> CredentialKind {
        match self.kind_tag {
            0 => CredentialKind::Primary,
            1 => CredentialKind::Secondary,
            _ => CredentialKind::Anonymous,
        }
    }
}

/// Known upstream hosts, used to resolve an Anonymous limiter for requests
/// carrying no credential query parameter at all.
const KNOWN_UPSTREAM_HOSTS: &[&str] = &[
    "api.coingecko.com",
    "pro-api.coingecko.com",
];

/// Concurrent map from (credential kind, value) to limiter. Lazily
/// populated; `Reconfigure` replaces only the entries whose settings
/// actually changed.
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<LimiterKey, Arc<RateLimiter>>>,
    settings: RwLock<HashMap<LimiterKey, RateLimitSetting>>,
    config: RwLock<Config>,
}

impl RateLimiterRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
        }
    }

    fn setting_for(&self, kind: CredentialKind) -> RateLimitSetting {
        self.config.read().rate_limit_for(kind)
    }

    /// Resolves the limiter for a request's credential, creating it lazily
    /// (double-checked locking so limiters are unique per key).
    pub fn limiter_for_credential(&self, kind: CredentialKind, value: &str) -> Arc<RateLimiter> {
        let key = LimiterKey::new(kind, value);

        if let Some(limiter) = self.limiters.read().get(&key) {
            return limiter.clone();
        }

        let setting = self.setting_for(kind);
        let mut limiters = self.limiters.write();
        if let Some(limiter) = limiters.get(&key) {
            return limiter.clone();
        }
        let limiter = Arc::new(RateLimiter::new(setting));
        limiters.insert(key.clone(), limiter.clone());
        self.settings.write().insert(key, setting);
        limiter
    }

    /// Resolves the limiter for a request URL per §3's lookup rule:
    /// credential query params identify kind+value; absent those, a known
    /// upstream host gets the Anonymous limiter; otherwise no limiter
    /// applies.
    pub fn limiter_for_url(&self, url: &reqwest::Url) -> Option<Arc<RateLimiter>> {
        let (kind, value) = credential_from_url(url)?;
        Some(self.limiter_for_credential(kind, &value))
    }

    /// Replaces limiters whose rate or burst changed in `new_config`;
    /// unchanged kinds keep their limiter instance (and in-flight token
    /// state) untouched.
    pub fn reconfigure(&self, new_config: Config) {
        let mut limiters = self.limiters.write();
        let mut settings = self.settings.write();

        for (key, limiter) in limiters.iter_mut() {
            let new_setting = new_config.rate_limit_for(key.kind());
            let changed = settings
                .get(key)
                .map(|old| {
                    old.requests_per_minute != new_setting.requests_per_minute
                        || old.burst != new_setting.burst
                })
                .unwrap_or(true);

            if changed {
                *limiter = Arc::new(RateLimiter::new(new_setting));
                settings.insert(key.clone(), new_setting);
            }
        }

        *self.config.write() = new_config;
    }
}

/// Extracts the credential kind+value carried by a request URL's query
/// string, or resolves the Anonymous fallback for a known upstream host.
fn credential_from_url(url: &reqwest::Url) -> Option<(CredentialKind, String)> {
    for (k, v) in url.query_pairs() {
        if k == "x_cg_pro_api_key" {
            return Some((CredentialKind::Primary, v.into_owned()));
        }
        if k == "x_cg_demo_api_key" {
            return Some((CredentialKind::Secondary, v.into_owned()));
        }
    }

    let host = url.host_str().unwrap_or_default();
    if KNOWN_UPSTREAM_HOSTS.contains(&host) {
        return Some((CredentialKind::Anonymous, String::new()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_sharing_by_credential_value() {
        let registry = RateLimiterRegistry::new(Config::default());
        let a = registry.limiter_for_credential(CredentialKind::Primary, "k1");
        let b = registry.limiter_for_credential(CredentialKind::Primary, "k1");
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.limiter_for_credential(CredentialKind::Primary, "k2");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn limiter_for_url_resolves_credential_kind() {
        let registry = RateLimiterRegistry::new(Config::default());
        let url = reqwest::Url::parse(
            "https://pro-api.coingecko.com/api/v3/coins/markets?x_cg_pro_api_key=abc",
        )
        .unwrap();
        let limiter = registry.limiter_for_url(&url);
        assert!(limiter.is_some());
    }

    #[test]
    fn limiter_for_url_falls_back_to_anonymous_on_known_host() {
        let registry = RateLimiterRegistry::new(Config::default());
        let url = reqwest::Url::parse("https://api.coingecko.com/api/v3/coins/markets").unwrap();
        assert!(registry.limiter_for_url(&url).is_some());
    }

    #[test]
    fn limiter_for_url_none_on_unknown_host_without_credential() {
        let registry = RateLimiterRegistry::new(Config::default());
        let url = reqwest::Url::parse("https://example.com/x").unwrap();
        assert!(registry.limiter_for_url(&url).is_none());
    }

    #[tokio::test]
    async fn reconfigure_replaces_only_changed_kinds() {
        let registry = RateLimiterRegistry::new(Config::default());
        let primary_before = registry.limiter_for_credential(CredentialKind::Primary, "p");
        let secondary_before = registry.limiter_for_credential(CredentialKind::Secondary, "s");

        let mut new_config = Config::default();
        new_config.rate_limits.insert(
            "primary".to_string(),
            RateLimitSetting {
                requests_per_minute: 999,
                burst: 99,
            },
        );
        registry.reconfigure(new_config);

        let primary_after = registry.limiter_for_credential(CredentialKind::Primary, "p");
        let secondary_after = registry.limiter_for_credential(CredentialKind::Secondary, "s");

        assert!(!Arc::ptr_eq(&primary_before, &primary_after));
        assert!(Arc::ptr_eq(&secondary_before, &secondary_after));
    }

    #[tokio::test]
    async fn rate_limiting_enforces_spacing() {
        let limiter = RateLimiter::new(RateLimitSetting {
            requests_per_minute: 30, // 1 token every 2s
            burst: 1,
        });
        let start = Instant::now();
        limiter.acquire(&CallContext::none()).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(100));

        limiter.acquire(&CallContext::none()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn cancellation_returns_without_granting_token() {
        let limiter = RateLimiter::new(RateLimitSetting {
            requests_per_minute: 6, // 1 token per 10s
            burst: 0,
        });
        let start = Instant::now();
        let ctx = CallContext::with_timeout(Duration::from_millis(100));
        let result = limiter.acquire(&ctx).await;
        assert!(matches!(result, Err(ExecError::Cancelled)));
        assert!(start.elapsed() <= Duration::from_millis(200));
    }
}
