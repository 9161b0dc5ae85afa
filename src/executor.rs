//! The retrying executor (§4.3) — the single entry point for all upstream
//! I/O, plus the `TryWithCredentials` failover helper (§4.3, §9).

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::credentials::{Credential, CredentialPool};
use crate::error::{AllCredentialsFailed, ExecError};
use crate::metrics::{MetricsSink, RequestStatus};
use crate::ratelimit::{CallContext, RateLimiterRegistry};
use crate::transport::HttpTransport;

const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(5),
            total_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    limiters: Arc<RateLimiterRegistry>,
    metrics: Arc<dyn MetricsSink>,
    options: RetryOptions,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiters: Arc<RateLimiterRegistry>,
        metrics: Arc<dyn MetricsSink>,
        options: RetryOptions,
    ) -> Self {
        Self {
            transport,
            limiters,
            metrics,
            options,
        }
    }

    /// Runs the full attempt loop for one request per §4.3.
    pub async fn execute(
        &self,
        url: &reqwest::Url,
        ctx: &CallContext,
    ) -> Result<(Vec<u8>, Duration), ExecError> {
        let start = Instant::now();
        let mut last_error: Option<ExecError> = None;

        for attempt in 0..self.options.max_attempts {
            if attempt > 0 {
                self.metrics.on_retry();
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }

            if let Some(limiter) = self.limiters.limiter_for_url(url) {
                if let Err(e) = limiter.acquire(ctx).await {
                    // Cancellation during the limiter wait stops the whole
                    // loop immediately; no further attempts.
                    return Err(e);
                }
            }

            match self.transport.get(url.clone(), self.options.total_timeout, ctx).await {
                Ok(response) => match classify(response) {
                    Ok(body) => {
                        self.metrics.on_request(RequestStatus::Success);
                        return Ok((body, start.elapsed()));
                    }
                    Err(e) if e.is_retryable() => {
                        self.metrics.on_request(if matches!(e, ExecError::Throttled { .. }) {
                            RequestStatus::RateLimited
                        } else {
                            RequestStatus::Error
                        });
                        last_error = Some(e);
                    }
                    Err(e) => {
                        self.metrics.on_request(RequestStatus::Error);
                        return Err(e);
                    }
                },
                // Context ending mid-call stops the loop immediately, same
                // as cancellation during the limiter wait above.
                Err(crate::transport::TransportError::Cancelled) => {
                    return Err(ExecError::Cancelled);
                }
                Err(transport_err) => {
                    self.metrics.on_request(RequestStatus::Error);
                    last_error = Some(ExecError::Transport(format!("{transport_err:?}")));
                }
            }
        }

        Err(last_error.unwrap_or(ExecError::Cancelled))
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.options.base_backoff.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let jitter = rand::thread_rng().gen_range(0.0..base / 2.0);
        Duration::from_secs_f64(base + jitter)
    }
}

fn classify(response: crate::transport::RawResponse) -> Result<Vec<u8>, ExecError> {
    match response.status {
        200 => Ok(response.body),
        429 => Err(ExecError::Throttled {
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }),
        s if RETRYABLE_STATUSES.contains(&s) => Err(ExecError::UpstreamTransient { status: s }),
        s => Err(ExecError::UpstreamPermanent {
            status: s,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }),
    }
}

/// Builds a per-credential request URL. Callers (the Param Normalizer /
/// Request Builder, §2) supply this so `TryWithCredentials` stays
/// credential-agnostic about URL shape.
pub trait CredentialedRequest {
    fn build(&self, credential: &Credential) -> reqwest::Url;
}

impl<F> CredentialedRequest for F
where
    F: Fn(&Credential) -> reqwest::Url,
{
    fn build(&self, credential: &Credential) -> reqwest::Url {
        self(credential)
    }
}

/// Iterates the pool's availability list, executing against each
/// credential in turn until one succeeds. Fresh attempt budget per
/// credential: the retry loop inside `execute` and this credential loop
/// are intentionally independent (§9).
pub async fn try_with_credentials(
    executor: &Executor,
    pool: &CredentialPool,
    ctx: &CallContext,
    request: &dyn CredentialedRequest,
) -> Result<(Vec<u8>, Duration), AllCredentialsFailed> {
    let mut last_error = ExecError::Cancelled;

    for credential in pool.available_credentials() {
        let url = request.build(&credential);
        match executor.execute(&url, ctx).await {
            Ok(ok) => return Ok(ok),
            Err(e) => {
                if !credential.value.is_empty() {
                    pool.mark_failed(&credential.value);
                }
                last_error = e;
            }
        }
    }

    Err(AllCredentialsFailed { last_error })
}
