//! The tiered periodic updater (§4.6, §4.6.1): a single coordinator loop
//! that inspects every tier independently, refreshes whichever are due or
//! stuck, and reconciles off-range "extra" IDs once a tier's own pages are
//! visible in the cache.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cache::KvCache;
use crate::config::MarketsConfig;
use crate::credentials::CredentialPool;
use crate::events::EventBus;
use crate::executor::Executor;
use crate::markets::facade::{id_key, page_key};
use crate::markets::fetch::{ChunkedFetcher, PaginatedFetcher};
use crate::markets::params::{MarketsParams, ParamNormalizer};
use crate::markets::record::extract_id;
use crate::markets::request::RequestBuilder;
use crate::markets::tier::{Tier, TierCacheEntry};
use crate::markets::top_ids::TopIdsIndex;
use crate::metrics::MetricsSink;
use crate::ratelimit::CallContext;

const COORDINATOR_TICK: Duration = Duration::from_secs(2);

pub struct TieredPeriodicUpdater {
    tiers: Vec<Tier>,
    tier_state: Mutex<HashMap<String, TierCacheEntry>>,
    extras: Mutex<HashSet<String>>,
    executor: Arc<Executor>,
    pool: Arc<CredentialPool>,
    request_builder: Arc<RequestBuilder>,
    cache: Arc<dyn KvCache>,
    top_ids: Arc<TopIdsIndex>,
    events: Arc<EventBus>,
    initialized_event: EventBus,
    initialized: AtomicBool,
    metrics: Arc<dyn MetricsSink>,
    markets: MarketsConfig,
    normalizer: Arc<ParamNormalizer>,
}

impl TieredPeriodicUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tiers: Vec<Tier>,
        executor: Arc<Executor>,
        pool: Arc<CredentialPool>,
        request_builder: Arc<RequestBuilder>,
        cache: Arc<dyn KvCache>,
        top_ids: Arc<TopIdsIndex>,
        events: Arc<EventBus>,
        metrics: Arc<dyn MetricsSink>,
        markets: MarketsConfig,
        normalizer: Arc<ParamNormalizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tiers,
            tier_state: Mutex::new(HashMap::new()),
            extras: Mutex::new(HashSet::new()),
            executor,
            pool,
            request_builder,
            cache,
            top_ids,
            events,
            initialized_event: EventBus::new(),
            initialized: AtomicBool::new(false),
            metrics,
            markets,
            normalizer,
        })
    }

    /// A tier's own refresh parameters, rewritten to the configured
    /// canonical form so that this tier's cache keys line up with whatever
    /// a client's equivalent request would normalize to.
    fn base_params(&self) -> MarketsParams {
        self.normalizer.normalize(&MarketsParams::default())
    }

    /// Runs the coordinator loop forever; intended to be spawned once at
    /// startup and left running for the process lifetime.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(COORDINATOR_TICK);
        loop {
            interval.tick().await;
            self.clone().tick();
        }
    }

    /// One coordinator pass: inspects every tier and kicks off a refresh
    /// task for any that are due or whose in-flight refresh is stuck.
    /// Non-blocking — refresh work happens on spawned tasks so a slow tier
    /// never delays the others.
    pub fn tick(self: Arc<Self>) {
        for tier in &self.tiers {
            let due = {
                let mut state = self.tier_state.lock();
                let entry = state.entry(tier.name.clone()).or_default();
                let due = entry.needs_refresh(tier.update_interval) || entry.is_stuck(tier.update_interval);
                if due {
                    entry.in_flight_since = Some(Instant::now());
                }
                due
            };

            if due {
                let this = self.clone();
                let tier = tier.clone();
                tokio::spawn(async move {
                    this.refresh_tier(tier).await;
                });
            }
        }
    }

    /// Registers IDs that fall outside every tier's page range but are
    /// still being served from cache (e.g. looked up directly by a
    /// client); their staleness is tracked independently of the tiers.
    pub fn register_extra_ids(&self, ids: &[String]) {
        let mut extras = self.extras.lock();
        for id in ids {
            extras.insert(id.clone());
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn subscribe_initialized(&self) -> crate::events::Subscription {
        self.initialized_event.subscribe()
    }

    async fn refresh_tier(self: Arc<Self>, tier: Tier) {
        let _guard = self.metrics.track_data_fetch_cycle();

        let fetcher = PaginatedFetcher {
            page_from: tier.page_from,
            page_to: tier.page_to,
            base_params: self.base_params(),
            inter_page_delay: self.markets.request_delay,
        };

        let cache = self.cache.clone();
        let top_ids = self.top_ids.clone();
        let ttl = self.markets.ttl;
        let mut write_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        let result = fetcher
            .fetch_pages(
                &self.executor,
                &self.pool,
                &CallContext::none(),
                &self.request_builder,
                |page| {
                    let cache = cache.clone();
                    let top_ids = top_ids.clone();
                    let page_no = page.page;
                    let blob = page.blob.clone();
                    let ids: Vec<String> = page.records.iter().filter_map(|r| extract_id(r)).collect();
                    let mut entries: HashMap<String, Vec<u8>> = page
                        .records
                        .iter()
                        .filter_map(|r| extract_id(r).map(|id| (id_key(&id), r.clone())))
                        .collect();
                    entries.insert(page_key(page_no), blob);

                    write_handles.push(tokio::spawn(async move {
                        let _ = cache.set(entries, ttl).await;
                        top_ids.update_page_ids(page_no, &ids);
                    }));
                },
            )
            .await;

        match result {
            Ok(pages) => {
                // Wait for every per-page write to land before this tier's
                // data is treated as visible — extras reconciliation and the
                // events/initialized signals below must never run ahead of
                // the writes they depend on.
                for handle in write_handles {
                    let _ = handle.await;
                }

                // Re-write the tier's aggregate snapshot (page blobs and
                // per-ID records from the final fetch result) so the cache
                // is coherent with the last page result even if individual
                // per-page writes landed out of order.
                let mut aggregate_entries: HashMap<String, Vec<u8>> = HashMap::new();
                for page in &pages {
                    aggregate_entries.insert(page_key(page.page), page.blob.clone());
                    for record in &page.records {
                        if let Some(id) = extract_id(record) {
                            aggregate_entries.insert(id_key(&id), record.clone());
                        }
                    }
                }
                if !aggregate_entries.is_empty() {
                    let _ = self.cache.set(aggregate_entries, ttl).await;
                }

                let record_ids: Vec<String> = pages
                    .iter()
                    .flat_map(|p| p.records.iter().filter_map(|r| extract_id(r)))
                    .collect();

                {
                    let mut state = self.tier_state.lock();
                    let entry = state.entry(tier.name.clone()).or_default();
                    entry.record_ids = record_ids;
                    entry.last_completed = Some(Instant::now());
                    entry.in_flight_since = None;
                    entry.initially_loaded = true;
                }

                self.metrics.record_cache_size(self.top_ids.report().total_retained as u64);

                self.events.emit();
                self.maybe_mark_initialized();

                if tier.fetch_extras {
                    self.reconcile_extras().await;
                }
            }
            Err(e) => {
                tracing::warn!(tier = %tier.name, error = %e, "tier refresh failed");
                let mut state = self.tier_state.lock();
                if let Some(entry) = state.get_mut(&tier.name) {
                    entry.in_flight_since = None;
                }
            }
        }
    }

    fn maybe_mark_initialized(&self) {
        if self.initialized.load(Ordering::SeqCst) {
            return;
        }

        let all_loaded = {
            let state = self.tier_state.lock();
            !self.tiers.is_empty()
                && self
                    .tiers
                    .iter()
                    .all(|t| state.get(&t.name).map(|e| e.initially_loaded).unwrap_or(false))
        };

        if all_loaded && !self.initialized.swap(true, Ordering::SeqCst) {
            self.initialized_event.emit();
        }
    }

    /// Re-fetches any extra ID that isn't covered by a tier, writing
    /// incrementally as soon as the chunked fetch resolves. Called only
    /// after a tier's own pages are already visible in the cache, so
    /// consumers never see an extras write race ahead of the tier data
    /// it's meant to supplement.
    ///
    /// An ID is missing if no tier-cache entry contains it, or stale if the
    /// tier that contains it was last updated more than TTL/2 ago — judged
    /// against tier-cache membership, not an independent per-ID clock, so
    /// an ID already covered by a tier is never redundantly re-fetched.
    async fn reconcile_extras(&self) {
        let half_ttl = self.markets.ttl / 2;

        let stale: Vec<String> = {
            let extras = self.extras.lock();
            let state = self.tier_state.lock();
            extras
                .iter()
                .filter(|id| {
                    let covering_tier = state.values().find(|entry| entry.record_ids.iter().any(|r| &r == id));
                    match covering_tier {
                        None => true,
                        Some(entry) => entry.last_completed.map(|t| t.elapsed() >= half_ttl).unwrap_or(true),
                    }
                })
                .cloned()
                .collect()
        };

        if stale.is_empty() {
            return;
        }

        let chunker = ChunkedFetcher::new(self.base_params(), self.markets.request_delay);
        let fetched = chunker
            .fetch_ids(
                &self.executor,
                &self.pool,
                &CallContext::none(),
                &self.request_builder,
                &stale,
                |_| {},
            )
            .await;

        if let Ok(records) = fetched {
            let mut entries = HashMap::new();
            for record in &records {
                if let Some(id) = extract_id(record) {
                    entries.insert(id_key(&id), record.clone());
                }
            }

            if !entries.is_empty() {
                let _ = self.cache.set(entries, self.markets.ttl).await;
                self.metrics.record_cache_size(self.top_ids.report().total_retained as u64);
                self.events.emit();
            }
        }
    }
}
