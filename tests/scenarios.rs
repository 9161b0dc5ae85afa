//! End-to-end scenarios exercising the updater, facade, executor, and
//! credential pool together against a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use coingecko_proxy_core::cache::InMemoryCache;
use coingecko_proxy_core::config::{Config, CredentialsConfig, MarketsConfig};
use coingecko_proxy_core::credentials::CredentialPool;
use coingecko_proxy_core::events::EventBus;
use coingecko_proxy_core::executor::{Executor, RetryOptions};
use coingecko_proxy_core::markets::facade::CacheStatus;
use coingecko_proxy_core::markets::{
    MarketsCacheFacade, ParamNormalizer, RequestBuilder, Tier, TieredPeriodicUpdater, TopIdsIndex,
};
use coingecko_proxy_core::metrics::NoopMetricsSink;
use coingecko_proxy_core::ratelimit::RateLimiterRegistry;
use coingecko_proxy_core::transport::testing::{MockTransport, ScriptedOutcome};

fn markets_config() -> MarketsConfig {
    MarketsConfig {
        ttl: Duration::from_secs(300),
        request_delay: Duration::from_millis(1),
        param_normalize: Default::default(),
    }
}

fn build(
    transport: Arc<MockTransport>,
    config: Config,
    tiers: Vec<Tier>,
) -> (Arc<TieredPeriodicUpdater>, Arc<MarketsCacheFacade>) {
    let executor = Arc::new(Executor::new(
        transport,
        Arc::new(RateLimiterRegistry::new(config.clone())),
        Arc::new(NoopMetricsSink),
        RetryOptions {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            ..RetryOptions::default()
        },
    ));
    let pool = Arc::new(CredentialPool::new(&config));
    let request_builder = Arc::new(RequestBuilder::new(None, None));
    let cache = Arc::new(InMemoryCache::new());
    let top_ids = Arc::new(TopIdsIndex::new());
    let events = Arc::new(EventBus::new());

    let normalizer = Arc::new(ParamNormalizer::new(Default::default()));
    let updater = TieredPeriodicUpdater::new(
        tiers,
        executor,
        pool,
        request_builder,
        cache.clone(),
        top_ids.clone(),
        events,
        Arc::new(NoopMetricsSink),
        markets_config(),
        normalizer.clone(),
    );
    let facade = Arc::new(MarketsCacheFacade::new(cache, top_ids, normalizer));
    (updater, facade)
}

/// S1: cache warm-up with a single tier — after one refresh cycle, a query
/// for an ID on that tier's pages is a full hit.
#[tokio::test]
async fn s1_cache_warms_up_for_a_single_tier() {
    let transport = Arc::new(MockTransport::new());
    transport.push_status(200, br#"[{"id":"bitcoin"},{"id":"ethereum"}]"#.to_vec());
    transport.push_status(200, br#"[]"#.to_vec());

    let tier = Tier {
        name: "top".to_string(),
        page_from: 1,
        page_to: 3,
        update_interval: Duration::from_secs(60),
        fetch_extras: false,
    };
    let (updater, facade) = build(transport, Config::default(), vec![tier]);

    updater.clone().tick();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(updater.is_initialized());
    let (status, records) = facade.by_ids(&["bitcoin".to_string()]).await.unwrap();
    assert_eq!(status, CacheStatus::Full);
    assert_eq!(records.len(), 1);
}

/// S2: partial cache — some requested IDs never made it into a cached
/// page, so the facade reports Partial rather than Full or Miss.
#[tokio::test]
async fn s2_partial_cache_hit() {
    let transport = Arc::new(MockTransport::new());
    transport.push_status(200, br#"[{"id":"bitcoin"}]"#.to_vec());
    transport.push_status(200, br#"[]"#.to_vec());

    let tier = Tier {
        name: "top".to_string(),
        page_from: 1,
        page_to: 2,
        update_interval: Duration::from_secs(60),
        fetch_extras: false,
    };
    let (updater, facade) = build(transport, Config::default(), vec![tier]);
    updater.clone().tick();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, records) = facade
        .by_ids(&["bitcoin".to_string(), "not-cached".to_string()])
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Partial);
    assert_eq!(records.len(), 1);
}

/// S3: multi-credential failover — the primary credential's request fails,
/// so the executor's credential loop falls through to the secondary and
/// still completes the refresh.
#[tokio::test]
async fn s3_multi_credential_failover_completes_refresh() {
    let transport = Arc::new(MockTransport::new());
    transport.push(ScriptedOutcome::TransportFailure);
    transport.push_status(200, br#"[{"id":"bitcoin"}]"#.to_vec());
    transport.push_status(200, br#"[]"#.to_vec());

    let config = Config {
        credentials: CredentialsConfig {
            primary: vec!["p1".to_string(), "p2".to_string()],
            secondary: vec![],
        },
        ..Config::default()
    };
    let tier = Tier {
        name: "top".to_string(),
        page_from: 1,
        page_to: 2,
        update_interval: Duration::from_secs(60),
        fetch_extras: false,
    };
    let (updater, facade) = build(transport, config, vec![tier]);
    updater.clone().tick();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(updater.is_initialized());
    let (status, _) = facade.by_ids(&["bitcoin".to_string()]).await.unwrap();
    assert_eq!(status, CacheStatus::Full);
}

/// S4: rate limiting — a second request against the same credential inside
/// one burst window is delayed until a token refills.
#[tokio::test]
async fn s4_rate_limiting_enforces_spacing_between_requests() {
    use coingecko_proxy_core::config::RateLimitSetting;
    use coingecko_proxy_core::credentials::Credential;
    use coingecko_proxy_core::ratelimit::CallContext;

    let transport = Arc::new(MockTransport::new());
    transport.push_status(200, b"one".to_vec());
    transport.push_status(200, b"two".to_vec());

    let mut config = Config::default();
    config.rate_limits.insert(
        "anonymous".to_string(),
        RateLimitSetting {
            requests_per_minute: 30,
            burst: 1,
        },
    );
    let limiters = Arc::new(RateLimiterRegistry::new(config));
    let executor = Executor::new(
        transport,
        limiters,
        Arc::new(NoopMetricsSink),
        RetryOptions {
            max_attempts: 1,
            ..RetryOptions::default()
        },
    );

    let builder = RequestBuilder::new(None, None);
    let url = builder.markets_url(&Default::default(), &Credential::anonymous());

    let start = std::time::Instant::now();
    executor.execute(&url, &CallContext::none()).await.unwrap();
    executor.execute(&url, &CallContext::none()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(1500));
}

/// S5: cancellation — a call whose context deadline elapses while waiting
/// on the limiter returns promptly without ever granting a token.
#[tokio::test]
async fn s5_cancellation_short_circuits_the_wait() {
    use coingecko_proxy_core::config::RateLimitSetting;
    use coingecko_proxy_core::credentials::Credential;
    use coingecko_proxy_core::error::ExecError;
    use coingecko_proxy_core::ratelimit::CallContext;

    let transport = Arc::new(MockTransport::new());
    transport.push_status(200, b"one".to_vec());

    let mut config = Config::default();
    config.rate_limits.insert(
        "anonymous".to_string(),
        RateLimitSetting {
            requests_per_minute: 6,
            burst: 0,
        },
    );
    let limiters = Arc::new(RateLimiterRegistry::new(config));
    let executor = Executor::new(
        transport,
        limiters,
        Arc::new(NoopMetricsSink),
        RetryOptions {
            max_attempts: 1,
            ..RetryOptions::default()
        },
    );

    let builder = RequestBuilder::new(None, None);
    let url = builder.markets_url(&Default::default(), &Credential::anonymous());

    let start = std::time::Instant::now();
    let ctx = CallContext::with_timeout(Duration::from_millis(100));
    let err = executor.execute(&url, &ctx).await.unwrap_err();
    assert!(matches!(err, ExecError::Cancelled));
    assert!(start.elapsed() <= Duration::from_millis(300));
}

/// S6: deduplicated Top-IDs under tier overlap — two tiers whose page
/// ranges cover the same ID converge on a single deduplicated sequence.
/// Each tier gets its own scripted transport so the two refreshes (which
/// the coordinator runs concurrently) can't race over a shared response
/// queue; what's shared is the cache and Top-IDs index they both write
/// into, which is the thing actually under test.
#[tokio::test]
async fn s6_overlapping_tiers_deduplicate_in_top_ids() {
    let cache = Arc::new(InMemoryCache::new());
    let top_ids = Arc::new(TopIdsIndex::new());

    let transport_top = Arc::new(MockTransport::new());
    transport_top.push_status(200, br#"[{"id":"bitcoin"},{"id":"ethereum"}]"#.to_vec());
    transport_top.push_status(200, br#"[]"#.to_vec());

    let transport_mid = Arc::new(MockTransport::new());
    transport_mid.push_status(200, br#"[{"id":"ethereum"},{"id":"solana"}]"#.to_vec());
    transport_mid.push_status(200, br#"[]"#.to_vec());

    let top_tier = Tier {
        name: "top".to_string(),
        page_from: 1,
        page_to: 2,
        update_interval: Duration::from_secs(60),
        fetch_extras: false,
    };
    let mid_tier = Tier {
        name: "mid".to_string(),
        page_from: 2,
        page_to: 3,
        update_interval: Duration::from_secs(60),
        fetch_extras: false,
    };

    let top_updater = build_with_shared_state(transport_top, Config::default(), vec![top_tier], cache.clone(), top_ids.clone());
    let mid_updater = build_with_shared_state(transport_mid, Config::default(), vec![mid_tier], cache.clone(), top_ids.clone());

    top_updater.clone().tick();
    mid_updater.clone().tick();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(top_updater.is_initialized());
    assert!(mid_updater.is_initialized());

    let ids = top_ids.get_top_ids(0);
    let unique: std::collections::HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());
    assert!(ids.contains(&"bitcoin".to_string()));
    assert!(ids.contains(&"ethereum".to_string()));
    assert!(ids.contains(&"solana".to_string()));
}

fn build_with_shared_state(
    transport: Arc<MockTransport>,
    config: Config,
    tiers: Vec<Tier>,
    cache: Arc<InMemoryCache>,
    top_ids: Arc<TopIdsIndex>,
) -> Arc<TieredPeriodicUpdater> {
    let executor = Arc::new(Executor::new(
        transport,
        Arc::new(RateLimiterRegistry::new(config.clone())),
        Arc::new(NoopMetricsSink),
        RetryOptions {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            ..RetryOptions::default()
        },
    ));
    let pool = Arc::new(CredentialPool::new(&config));
    let request_builder = Arc::new(RequestBuilder::new(None, None));
    let events = Arc::new(EventBus::new());

    TieredPeriodicUpdater::new(
        tiers,
        executor,
        pool,
        request_builder,
        cache,
        top_ids,
        events,
        Arc::new(NoopMetricsSink),
        markets_config(),
        Arc::new(ParamNormalizer::new(Default::default())),
    )
}
