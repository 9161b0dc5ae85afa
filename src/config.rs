//! Configuration object consumed by the core (§6).
//!
//! Loaded from a TOML file with environment-variable overrides. Immutable
//! per process unless `Config::reload` is called explicitly by the
//! composition root.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::credentials::CredentialKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSetting {
    pub requests_per_minute: u32,
    pub burst: u32,
}

/// Built-in defaults per §6: Primary=500/min, Secondary=30/min, Anonymous=30/min;
/// burst defaults to the ceiling of the per-second rate.
pub fn default_rate_limit(kind: CredentialKind) -> RateLimitSetting {
    let rpm = match kind {
        CredentialKind::Primary => 500,
        CredentialKind::Secondary => 30,
        CredentialKind::Anonymous => 30,
    };
    let burst = rpm.div_ceil(60).max(1);
    RateLimitSetting {
        requests_per_minute: rpm,
        burst,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub page_from: u32,
    pub page_to: u32,
    #[serde(with = "humantime_secs")]
    pub update_interval: Duration,
    #[serde(default)]
    pub fetch_extras: bool,
}

/// Rewrites selected client-supplied fields to the configured canonical
/// value so that semantically equivalent requests share cache keys.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParamNormalizeConfig {
    pub currency: Option<String>,
    pub order: Option<String>,
    pub per_page: Option<u32>,
    pub sparkline: Option<bool>,
    pub price_change_percentage: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsConfig {
    #[serde(with = "humantime_secs")]
    pub ttl: Duration,
    #[serde(with = "humantime_millis", rename = "request_delay_ms")]
    pub request_delay: Duration,
    #[serde(default)]
    pub param_normalize: ParamNormalizeConfig,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            request_delay: Duration::from_millis(250),
            param_normalize: ParamNormalizeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub override_upstream_primary_url: Option<String>,
    pub override_upstream_public_url: Option<String>,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitSetting>,
    #[serde(default)]
    pub markets_tiers: Vec<TierConfig>,
    #[serde(default)]
    pub markets: MarketsConfig,
}

impl Config {
    pub fn rate_limit_for(&self, kind: CredentialKind) -> RateLimitSetting {
        let key = match kind {
            CredentialKind::Primary => "primary",
            CredentialKind::Secondary => "secondary",
            CredentialKind::Anonymous => "anonymous",
        };
        self.rate_limits
            .get(key)
            .copied()
            .unwrap_or_else(|| default_rate_limit(kind))
    }

    /// Load from a TOML file on disk.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `COINGECKO_PROXY_CONFIG` (default `config.toml`), falling
    /// back to defaults plus environment-variable credential overrides if
    /// the file is missing.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let path = std::env::var("COINGECKO_PROXY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("using default config ({}): {}", path, e);
            Self::default()
        });

        if let Ok(keys) = std::env::var("COINGECKO_PRIMARY_KEYS") {
            config.credentials.primary = keys.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(keys) = std::env::var("COINGECKO_SECONDARY_KEYS") {
            config.credentials.secondary = keys.split(',').map(|s| s.trim().to_string()).collect();
        }

        config
    }
}

mod humantime_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
