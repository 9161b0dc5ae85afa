//! The markets cache facade (§4.7): read-only queries against the `KvCache`
//! contract. Never fetches upstream on a miss — that's the updater's job.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::KvCache;
use crate::error::CacheError;
use crate::markets::params::{MarketsParams, ParamNormalizer};
use crate::markets::record::TokenRecord;
use crate::markets::top_ids::TopIdsIndex;

pub fn id_key(id: &str) -> String {
    format!("markets:{id}")
}

pub fn page_key(page: u32) -> String {
    format!("markets_page:{page}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Full,
    Partial,
    Miss,
}

fn status_for(requested: usize, found: usize) -> CacheStatus {
    if requested == 0 || found == requested {
        CacheStatus::Full
    } else if found == 0 {
        CacheStatus::Miss
    } else {
        CacheStatus::Partial
    }
}

pub struct MarketsCacheFacade {
    cache: Arc<dyn KvCache>,
    top_ids: Arc<TopIdsIndex>,
    normalizer: Arc<ParamNormalizer>,
}

impl MarketsCacheFacade {
    pub fn new(cache: Arc<dyn KvCache>, top_ids: Arc<TopIdsIndex>, normalizer: Arc<ParamNormalizer>) -> Self {
        Self {
            cache,
            top_ids,
            normalizer,
        }
    }

    /// Looks up each requested ID's record independently; order of the
    /// returned records matches `ids`, and missing IDs are simply absent
    /// (not padded with placeholders).
    pub async fn by_ids(&self, ids: &[String]) -> Result<(CacheStatus, Vec<TokenRecord>), CacheError> {
        if ids.is_empty() {
            return Ok((CacheStatus::Full, Vec::new()));
        }

        let keys: Vec<String> = ids.iter().map(|id| id_key(id)).collect();
        let (hits, _misses) = self.cache.get(&keys).await?;

        let records: Vec<TokenRecord> = ids
            .iter()
            .filter_map(|id| hits.get(&id_key(id)).cloned())
            .collect();

        Ok((status_for(ids.len(), records.len()), records))
    }

    /// Looks up a contiguous page range, one cache key per page; a page
    /// blob is split back into individual records on read.
    pub async fn by_page(&self, page_from: u32, page_to: u32) -> Result<(CacheStatus, Vec<TokenRecord>), CacheError> {
        let pages: Vec<u32> = (page_from..=page_to).collect();
        let keys: Vec<String> = pages.iter().map(|p| page_key(*p)).collect();
        let (hits, _misses) = self.cache.get(&keys).await?;

        let mut records = Vec::new();
        let mut found_pages = 0;
        for page in &pages {
            if let Some(blob) = hits.get(&page_key(*page)) {
                found_pages += 1;
                if let Ok(mut page_records) = crate::markets::record::split_page_blob(blob) {
                    records.append(&mut page_records);
                }
            }
        }

        Ok((status_for(pages.len(), found_pages), records))
    }

    /// The top `limit` records by rank: normalize the request to the
    /// canonical `per_page`, derive the smallest covering page range,
    /// delegate to the page-range query, then trim to exactly `limit`.
    /// `limit=0` returns an empty, full-status result without touching
    /// the cache.
    pub async fn top_markets(&self, limit: usize, currency: &str) -> Result<(CacheStatus, Vec<TokenRecord>), CacheError> {
        if limit == 0 {
            return Ok((CacheStatus::Full, Vec::new()));
        }

        let requested = MarketsParams {
            vs_currency: currency.to_string(),
            ..MarketsParams::default()
        };
        let normalized = self.normalizer.normalize(&requested);
        let per_page = self.normalizer.canonical_per_page(&normalized);
        let page_count = (limit as u32).div_ceil(per_page).max(1);

        let (status, mut records) = self.by_page(1, page_count).await?;
        records.truncate(limit);
        Ok((status, records))
    }

    pub fn top_market_ids(&self, limit: usize) -> Vec<String> {
        self.top_ids.get_top_ids(limit)
    }
}
