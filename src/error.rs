//! Error taxonomy for the caching/refresh core.
//!
//! Mirrors the semantic taxonomy from the design: errors are classified by
//! how the retrying executor and its callers should react to them, not by
//! where in the call stack they originated.

use std::fmt;

/// Errors produced while executing a single upstream HTTP call.
#[derive(Debug)]
pub enum ExecError {
    /// Connection/read/write failed or timed out. Retryable.
    Transport(String),
    /// Upstream reported 429. Retryable; body kept for logs.
    Throttled { body: String },
    /// A 5xx in the retryable set (500, 502, 503, 504). Retryable.
    UpstreamTransient { status: u16 },
    /// Any other non-2xx status. Fatal to the attempt.
    UpstreamPermanent { status: u16, body: String },
    /// Body was not JSON-parseable. Fatal to the call.
    ParseFailure(String),
    /// The caller's context ended while waiting on the limiter or the HTTP
    /// call itself. Fatal to the attempt; never retried.
    Cancelled,
}

impl ExecError {
    /// Whether the executor's retry loop should attempt again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Transport(_) | ExecError::Throttled { .. } | ExecError::UpstreamTransient { .. }
        )
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Transport(msg) => write!(f, "transport failure: {msg}"),
            ExecError::Throttled { body } => write!(f, "rate limited by upstream: {body}"),
            ExecError::UpstreamTransient { status } => {
                write!(f, "transient upstream error: status {status}")
            }
            ExecError::UpstreamPermanent { status, body } => {
                write!(f, "upstream error: status {status}: {body}")
            }
            ExecError::ParseFailure(msg) => write!(f, "failed to parse upstream body: {msg}"),
            ExecError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ExecError {}

/// Produced by `TryWithCredentials` once every credential has failed.
#[derive(Debug)]
pub struct AllCredentialsFailed {
    pub last_error: ExecError,
}

impl fmt::Display for AllCredentialsFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all credentials exhausted, last error: {}",
            self.last_error
        )
    }
}

impl std::error::Error for AllCredentialsFailed {}

/// Errors surfaced by the K/V cache contract. The façade never turns these
/// into client-visible failures; it logs them and treats the key as absent.
#[derive(Debug)]
pub struct CacheError(pub String);

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache error: {}", self.0)
    }
}

impl std::error::Error for CacheError {}
