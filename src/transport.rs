//! HTTP transport contract (§6, consumed) and its concrete implementations.
//!
//! A synchronous request/response call with a pluggable connection-dial
//! timeout and a total timeout on the client, used only for GET with query
//! parameters. Kept behind a trait (rather than a concrete
//! `reqwest::Client` field) so the retrying executor can be driven by a
//! deterministic mock in tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::ratelimit::CallContext;

/// A raw upstream response: status code plus body bytes, stored byte-exact
/// per §3's "Token record" note.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub enum TransportError {
    /// Connect/read/write failed or timed out.
    Failed(String),
    /// The call's context ended while the request was in flight.
    Cancelled,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// `ctx` is honored for the duration of the call, not just while
    /// waiting on a rate-limit token: if its deadline elapses before the
    /// response arrives, the call is abandoned and `TransportError::Cancelled`
    /// is returned.
    async fn get(
        &self,
        url: reqwest::Url,
        total_timeout: Duration,
        ctx: &CallContext,
    ) -> Result<RawResponse, TransportError>;
}

/// `reqwest`-backed transport: rustls, a fixed connect timeout baked into
/// the client at construction, a per-call total timeout applied to the
/// request.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent("coingecko-proxy-core/0.1")
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: reqwest::Url,
        total_timeout: Duration,
        ctx: &CallContext,
    ) -> Result<RawResponse, TransportError> {
        let request = async {
            let response = self
                .client
                .get(url)
                .timeout(total_timeout)
                .send()
                .await
                .map_err(|e| TransportError::Failed(e.to_string()))?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Failed(e.to_string()))?
                .to_vec();

            Ok(RawResponse { status, body })
        };

        match ctx.remaining() {
            Some(remaining) => {
                tokio::select! {
                    result = request => result,
                    _ = tokio::time::sleep(remaining) => Err(TransportError::Cancelled),
                }
            }
            None => request.await,
        }
    }
}

/// Deterministic transport for tests: scripted per-URL (or default)
/// responses, with call history for assertions.
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    pub enum ScriptedOutcome {
        Response(RawResponse),
        TransportFailure,
        /// Simulates the call taking this long before returning `Response`.
        Delayed(Duration, RawResponse),
    }

    pub struct MockTransport {
        queue: Mutex<VecDeque<ScriptedOutcome>>,
        default_status: u16,
        default_body: Vec<u8>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                queue: Mutex::new(VecDeque::new()),
                default_status: 200,
                default_body: b"{}".to_vec(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push(&self, outcome: ScriptedOutcome) {
            self.queue.lock().push_back(outcome);
        }

        pub fn push_status(&self, status: u16, body: impl Into<Vec<u8>>) {
            self.push(ScriptedOutcome::Response(RawResponse {
                status,
                body: body.into(),
            }));
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(
            &self,
            url: reqwest::Url,
            _total_timeout: Duration,
            ctx: &CallContext,
        ) -> Result<RawResponse, TransportError> {
            self.calls.lock().push(url.to_string());

            let outcome = self.queue.lock().pop_front();
            match outcome {
                Some(ScriptedOutcome::Response(r)) => Ok(r),
                Some(ScriptedOutcome::TransportFailure) => {
                    Err(TransportError::Failed("simulated transport failure".into()))
                }
                Some(ScriptedOutcome::Delayed(d, r)) => match ctx.remaining() {
                    Some(remaining) if remaining < d => {
                        tokio::time::sleep(remaining).await;
                        Err(TransportError::Cancelled)
                    }
                    _ => {
                        tokio::time::sleep(d).await;
                        Ok(r)
                    }
                },
                None => Ok(RawResponse {
                    status: self.default_status,
                    body: self.default_body.clone(),
                }),
            }
        }
    }

}
