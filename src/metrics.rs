//! Metrics sink contract (§6, consumed).
//!
//! The core has no direct dependency on a specific metrics library; the
//! trait is the contract, and `PrometheusMetricsSink` is the concrete
//! implementation wired in by the binary, recording through the
//! `metrics` + `metrics-exporter-prometheus` stack.

pub enum RequestStatus {
    Success,
    Error,
    RateLimited,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
            RequestStatus::RateLimited => "rate_limited",
        }
    }
}

/// A start/stop pair for timing a full data-fetch cycle. Modeled as an RAII
/// guard: the stop closure fires on `Drop`, the same span-guard idiom used
/// in `middleware/logging.rs`.
pub struct DataFetchCycleGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl DataFetchCycleGuard {
    pub fn new(stop: Box<dyn FnOnce() + Send>) -> Self {
        Self { stop: Some(stop) }
    }

    pub fn noop() -> Self {
        Self { stop: None }
    }
}

impl Drop for DataFetchCycleGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn on_request(&self, status: RequestStatus);
    fn on_retry(&self);
    fn record_cache_size(&self, n: u64);
    fn track_data_fetch_cycle(&self) -> DataFetchCycleGuard;
}

/// Records through the global `metrics` recorder.
pub struct PrometheusMetricsSink;

impl MetricsSink for PrometheusMetricsSink {
    fn on_request(&self, status: RequestStatus) {
        metrics::counter!("upstream_requests_total", "status" => status.as_str()).increment(1);
    }

    fn on_retry(&self) {
        metrics::counter!("upstream_retries_total").increment(1);
    }

    fn record_cache_size(&self, n: u64) {
        metrics::gauge!("markets_cache_size").set(n as f64);
    }

    fn track_data_fetch_cycle(&self) -> DataFetchCycleGuard {
        let start = std::time::Instant::now();
        DataFetchCycleGuard::new(Box::new(move || {
            metrics::histogram!("data_fetch_cycle_seconds").record(start.elapsed().as_secs_f64());
        }))
    }
}

/// Discards everything; used in unit tests so assertions don't depend on
/// a global recorder being installed.
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn on_request(&self, _status: RequestStatus) {}
    fn on_retry(&self) {}
    fn record_cache_size(&self, _n: u64) {}
    fn track_data_fetch_cycle(&self) -> DataFetchCycleGuard {
        DataFetchCycleGuard::noop()
    }
}
