//! The markets subsystem (§3, §4.4-§4.9): canonical param handling,
//! request URL construction, token record helpers, paginated/chunked
//! fetching, the Top-IDs index, the cache facade, and the tiered updater.

pub mod facade;
pub mod fetch;
pub mod params;
pub mod record;
pub mod request;
pub mod tier;
pub mod top_ids;
pub mod updater;

pub use facade::{CacheStatus, MarketsCacheFacade};
pub use fetch::{ChunkedFetcher, FetchedPage, PaginatedFetcher};
pub use params::{MarketsParams, ParamNormalizer};
pub use record::{extract_id, join_page_blob, split_page_blob, TokenRecord};
pub use request::RequestBuilder;
pub use tier::{Tier, TierCacheEntry};
pub use top_ids::{TopIdsIndex, TopIdsReport};
pub use updater::TieredPeriodicUpdater;
