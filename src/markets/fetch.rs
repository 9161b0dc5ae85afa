//! Paginated and chunked fetchers (§4.4, §4.5): sequential upstream
//! pulls with per-page/per-chunk emission and an inter-call delay.

use std::time::Duration;

use crate::credentials::CredentialPool;
use crate::error::AllCredentialsFailed;
use crate::executor::{try_with_credentials, Executor};
use crate::markets::params::MarketsParams;
use crate::markets::record::{split_page_blob, TokenRecord};
use crate::markets::request::RequestBuilder;
use crate::ratelimit::CallContext;

pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// One fetched page: its number, the raw blob bytes, and its parsed
/// records.
pub struct FetchedPage {
    pub page: u32,
    pub blob: Vec<u8>,
    pub records: Vec<TokenRecord>,
}

pub struct PaginatedFetcher {
    pub page_from: u32,
    pub page_to: u32,
    pub base_params: MarketsParams,
    pub inter_page_delay: Duration,
}

impl PaginatedFetcher {
    /// Iterates `[page_from, page_to]` sequentially. `on_page` is invoked
    /// synchronously for every non-empty page (callers that want
    /// non-blocking cache writes spawn their own task inside the
    /// callback). Stops early on the first empty page per §9's
    /// conservative end-of-dataset rule. A failure on the first page
    /// propagates; a failure on any later page returns what was already
    /// collected with no error.
    pub async fn fetch_pages<F>(
        &self,
        executor: &Executor,
        pool: &CredentialPool,
        ctx: &CallContext,
        builder: &RequestBuilder,
        mut on_page: F,
    ) -> Result<Vec<FetchedPage>, AllCredentialsFailed>
    where
        F: FnMut(&FetchedPage),
    {
        let mut collected = Vec::new();

        for page in self.page_from..=self.page_to {
            let mut params = self.base_params.clone();
            params.page = page;
            params.per_page = self.base_params.per_page;

            let request = |c: &crate::credentials::Credential| builder.markets_url(&params, c);
            let result = try_with_credentials(executor, pool, ctx, &request).await;

            let (body, _duration) = match result {
                Ok(ok) => ok,
                Err(e) => {
                    if page == self.page_from {
                        return Err(e);
                    }
                    return Ok(collected);
                }
            };

            let records = match split_page_blob(&body) {
                Ok(records) => records,
                Err(_) => {
                    if page == self.page_from {
                        return Err(AllCredentialsFailed {
                            last_error: crate::error::ExecError::ParseFailure(
                                "page body was not a JSON array".to_string(),
                            ),
                        });
                    }
                    return Ok(collected);
                }
            };

            if records.is_empty() {
                break;
            }

            let fetched = FetchedPage {
                page,
                blob: body,
                records,
            };
            on_page(&fetched);
            collected.push(fetched);

            if page != self.page_to {
                tokio::time::sleep(self.inter_page_delay).await;
            }
        }

        Ok(collected)
    }
}

pub struct ChunkedFetcher {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
    pub base_params: MarketsParams,
}

impl ChunkedFetcher {
    pub fn new(base_params: MarketsParams, inter_chunk_delay: Duration) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_chunk_delay,
            base_params,
        }
    }

    /// Fetches `ids` as bounded-size chunks. The concatenated result
    /// preserves input-ID order regardless of what order upstream
    /// returned a given chunk in; `on_chunk` sees each chunk's raw
    /// (upstream-ordered) records as they arrive.
    pub async fn fetch_ids<F>(
        &self,
        executor: &Executor,
        pool: &CredentialPool,
        ctx: &CallContext,
        builder: &RequestBuilder,
        ids: &[String],
        mut on_chunk: F,
    ) -> Result<Vec<TokenRecord>, AllCredentialsFailed>
    where
        F: FnMut(&[TokenRecord]),
    {
        let mut by_id = std::collections::HashMap::with_capacity(ids.len());

        for (i, chunk) in ids.chunks(self.chunk_size.max(1)).enumerate() {
            let mut params = self.base_params.clone();
            params.page = 1;
            params.per_page = self.chunk_size as u32;
            params.ids = Some(chunk.to_vec());

            let request = |c: &crate::credentials::Credential| builder.markets_url(&params, c);
            let (body, _duration) = try_with_credentials(executor, pool, ctx, &request).await?;

            let records = split_page_blob(&body).map_err(|_| AllCredentialsFailed {
                last_error: crate::error::ExecError::ParseFailure(
                    "chunk body was not a JSON array".to_string(),
                ),
            })?;

            on_chunk(&records);

            for record in &records {
                if let Some(id) = crate::markets::record::extract_id(record) {
                    by_id.insert(id, record.clone());
                }
            }

            if i + 1 < ids.len().div_ceil(self.chunk_size.max(1)) {
                tokio::time::sleep(self.inter_chunk_delay).await;
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::CredentialPool;
    use crate::executor::{Executor, RetryOptions};
    use crate::metrics::NoopMetricsSink;
    use crate::ratelimit::RateLimiterRegistry;
    use crate::transport::testing::{MockTransport, ScriptedOutcome};
    use std::sync::Arc;

    fn setup(transport: Arc<MockTransport>) -> (Executor, CredentialPool, RequestBuilder) {
        let executor = Executor::new(
            transport,
            Arc::new(RateLimiterRegistry::new(Config::default())),
            Arc::new(NoopMetricsSink),
            RetryOptions {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                ..RetryOptions::default()
            },
        );
        let pool = CredentialPool::new(&Config::default());
        let builder = RequestBuilder::new(None, None);
        (executor, pool, builder)
    }

    #[tokio::test]
    async fn stops_on_first_empty_page() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(200, br#"[{"id":"a"}]"#.to_vec());
        transport.push_status(200, br#"[]"#.to_vec());
        let (executor, pool, builder) = setup(transport);

        let fetcher = PaginatedFetcher {
            page_from: 1,
            page_to: 5,
            base_params: MarketsParams::default(),
            inter_page_delay: Duration::from_millis(1),
        };

        let pages = fetcher
            .fetch_pages(&executor, &pool, &CallContext::none(), &builder, |_| {})
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
    }

    #[tokio::test]
    async fn first_page_failure_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.push(ScriptedOutcome::TransportFailure);
        transport.push(ScriptedOutcome::TransportFailure);
        let (executor, pool, builder) = setup(transport);

        let fetcher = PaginatedFetcher {
            page_from: 1,
            page_to: 2,
            base_params: MarketsParams::default(),
            inter_page_delay: Duration::from_millis(1),
        };

        let result = fetcher
            .fetch_pages(&executor, &pool, &CallContext::none(), &builder, |_| {})
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn later_page_failure_returns_partial_without_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(200, br#"[{"id":"a"},{"id":"b"}]"#.to_vec());
        // Page 2 fails on both attempts (max_attempts=2).
        transport.push(ScriptedOutcome::TransportFailure);
        transport.push(ScriptedOutcome::TransportFailure);
        let (executor, pool, builder) = setup(transport);

        let fetcher = PaginatedFetcher {
            page_from: 1,
            page_to: 2,
            base_params: MarketsParams::default(),
            inter_page_delay: Duration::from_millis(1),
        };

        let pages = fetcher
            .fetch_pages(&executor, &pool, &CallContext::none(), &builder, |_| {})
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page, 1);
    }

    #[tokio::test]
    async fn chunked_fetch_preserves_input_id_order() {
        let transport = Arc::new(MockTransport::new());
        // Upstream returns chunk records out of input order.
        transport.push_status(200, br#"[{"id":"c"},{"id":"a"}]"#.to_vec());
        let (executor, pool, builder) = setup(transport);

        let fetcher = ChunkedFetcher::new(MarketsParams::default(), Duration::from_millis(1));
        let ids = vec!["a".to_string(), "c".to_string()];
        let records = fetcher
            .fetch_ids(&executor, &pool, &CallContext::none(), &builder, &ids, |_| {})
            .await
            .unwrap();

        let got_ids: Vec<String> = records
            .iter()
            .filter_map(|r| crate::markets::record::extract_id(r))
            .collect();
        assert_eq!(got_ids, vec!["a".to_string(), "c".to_string()]);
    }
}
