//! Composition root: wires config, credentials, rate limiting, the
//! executor, cache, event bus, and the tiered updater together, then serves
//! the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware as axum_middleware;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use coingecko_proxy_core::cache::InMemoryCache;
use coingecko_proxy_core::config::Config;
use coingecko_proxy_core::credentials::CredentialPool;
use coingecko_proxy_core::events::EventBus;
use coingecko_proxy_core::executor::{Executor, RetryOptions};
use coingecko_proxy_core::http_api::{self, AppState};
use coingecko_proxy_core::markets::{
    MarketsCacheFacade, ParamNormalizer, RequestBuilder, Tier, TieredPeriodicUpdater, TopIdsIndex,
};
use coingecko_proxy_core::metrics::PrometheusMetricsSink;
use coingecko_proxy_core::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use coingecko_proxy_core::ratelimit::RateLimiterRegistry;
use coingecko_proxy_core::transport::ReqwestTransport;

#[derive(Parser, Debug)]
#[command(name = "coingecko-proxy")]
struct Cli {
    /// Path to the TOML config file; falls back to `COINGECKO_PROXY_CONFIG`
    /// then built-in defaults.
    #[arg(long, env = "COINGECKO_PROXY_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "COINGECKO_PROXY_PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Some(ref path) = cli.config {
        std::env::set_var("COINGECKO_PROXY_CONFIG", path);
    }
    let config = Config::from_env();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    let pool = Arc::new(CredentialPool::new(&config));
    let limiters = Arc::new(RateLimiterRegistry::new(config.clone()));
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5)));
    let metrics_sink = Arc::new(PrometheusMetricsSink);
    let executor = Arc::new(Executor::new(
        transport,
        limiters,
        metrics_sink.clone(),
        RetryOptions::default(),
    ));

    let cache = Arc::new(InMemoryCache::new());
    let top_ids = Arc::new(TopIdsIndex::new());
    let events = Arc::new(EventBus::new());
    let request_builder = Arc::new(RequestBuilder::new(
        config.override_upstream_primary_url.clone(),
        config.override_upstream_public_url.clone(),
    ));

    let tiers: Vec<Tier> = config.markets_tiers.iter().map(Tier::from).collect();
    if tiers.is_empty() {
        tracing::warn!("no markets_tiers configured; the updater will have nothing to refresh");
    }

    let normalizer = Arc::new(ParamNormalizer::new(config.markets.param_normalize.clone()));

    let updater = TieredPeriodicUpdater::new(
        tiers,
        executor,
        pool,
        request_builder,
        cache.clone(),
        top_ids.clone(),
        events,
        metrics_sink,
        config.markets.clone(),
        normalizer.clone(),
    );
    tokio::spawn(updater.clone().run());

    let facade = Arc::new(MarketsCacheFacade::new(cache, top_ids, normalizer));
    let state = AppState {
        facade,
        prometheus: Some(prometheus),
    };

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    let app = http_api::router(state)
        .route_layer(axum_middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!(%addr, "starting coingecko-proxy");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
