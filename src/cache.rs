//! Generic key/value cache contract (§6, consumed) and an in-memory
//! implementation satisfying it.
//!
//! The contract makes no assumption about eviction discipline; the core
//! never relies on one (§3's "Cache keys" note: stale reads are
//! permitted). `InMemoryCache` is process-local and volatile per §1's
//! Non-goals — there is no persistence layer in this crate.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::CacheError;

#[async_trait]
pub trait KvCache: Send + Sync {
    /// Returns hits (key -> bytes) and the subset of `keys` not found (or
    /// expired). Must be atomic per key but not across keys.
    async fn get(&self, keys: &[String]) -> Result<(HashMap<String, Vec<u8>>, Vec<String>), CacheError>;

    /// Writes every entry with the given TTL.
    async fn set(&self, entries: HashMap<String, Vec<u8>>, ttl: Duration) -> Result<(), CacheError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Sharded-by-nothing in-memory store behind a single reader/writer lock;
/// correctness doesn't depend on eviction, so there's no background sweep —
/// expired entries are simply treated as misses on read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvCache for InMemoryCache {
    async fn get(&self, keys: &[String]) -> Result<(HashMap<String, Vec<u8>>, Vec<String>), CacheError> {
        let now = Instant::now();
        let map = self.entries.read();
        let mut hits = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();

        for key in keys {
            match map.get(key) {
                Some(entry) if entry.expires_at > now => {
                    hits.insert(key.clone(), entry.value.clone());
                }
                _ => misses.push(key.clone()),
            }
        }

        Ok((hits, misses))
    }

    async fn set(&self, entries: HashMap<String, Vec<u8>>, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now() + ttl;
        let mut map = self.entries.write();
        for (key, value) in entries {
            map.insert(key, Entry { value, expires_at });
        }
        Ok(())
    }
}
