// Metrics module - Prometheus metrics for the gateway
//
// Every gateway instance owns a private `Registry`, so several gateways (and
// tests) can run in one process without colliding on metric names.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Buckets for request and upstream latencies, 1ms to 30s
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub struct Metrics {
    registry: Registry,

    /// Completed requests by method and status
    requests: IntCounterVec,

    /// End-to-end request duration
    request_duration: Histogram,

    /// Management API calls by cluster and outcome
    upstream_requests: IntCounterVec,

    /// Management API call duration by cluster
    upstream_duration: HistogramVec,

    /// Authentication failures by reason
    auth_failures: IntCounterVec,

    /// Requests rejected by cluster access control
    access_denied: IntCounter,

    /// Requests currently being processed
    active_requests: IntGauge,

    /// Management API clients held by the pool
    pooled_clients: IntGauge,

    /// Audit records by outcome
    audit_records: IntCounterVec,

    /// Requests rejected by the rate limiter
    rate_limited: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("warren_requests_total", "Total HTTP requests handled"),
            &["method", "status"],
        )?;
        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "warren_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let upstream_requests = IntCounterVec::new(
            Opts::new(
                "warren_upstream_requests_total",
                "Management API requests by cluster and outcome",
            ),
            &["cluster", "outcome"],
        )?;
        let upstream_duration = HistogramVec::new(
            HistogramOpts::new(
                "warren_upstream_duration_seconds",
                "Management API request duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["cluster"],
        )?;
        let auth_failures = IntCounterVec::new(
            Opts::new("warren_auth_failures_total", "Authentication failures"),
            &["reason"],
        )?;
        let access_denied = IntCounter::new(
            "warren_access_denied_total",
            "Requests denied by cluster access control",
        )?;
        let active_requests =
            IntGauge::new("warren_active_requests", "Requests currently in flight")?;
        let pooled_clients = IntGauge::new(
            "warren_pooled_clients",
            "Management API clients currently pooled",
        )?;
        let audit_records = IntCounterVec::new(
            Opts::new("warren_audit_records_total", "Audit records written"),
            &["outcome"],
        )?;
        let rate_limited = IntCounter::new(
            "warren_rate_limited_total",
            "Requests rejected by the rate limiter",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(upstream_requests.clone()))?;
        registry.register(Box::new(upstream_duration.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;
        registry.register(Box::new(access_denied.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;
        registry.register(Box::new(pooled_clients.clone()))?;
        registry.register(Box::new(audit_records.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            upstream_requests,
            upstream_duration,
            auth_failures,
            access_denied,
            active_requests,
            pooled_clients,
            audit_records,
            rate_limited,
        })
    }

    pub fn record_request(&self, method: &str, status: u16, duration: Duration) {
        self.requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.request_duration.observe(duration.as_secs_f64());
    }

    pub fn record_upstream(&self, cluster: &str, outcome: &str, duration: Duration) {
        self.upstream_requests
            .with_label_values(&[cluster, outcome])
            .inc();
        self.upstream_duration
            .with_label_values(&[cluster])
            .observe(duration.as_secs_f64());
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures.with_label_values(&[reason]).inc();
    }

    pub fn record_access_denied(&self) {
        self.access_denied.inc();
    }

    pub fn record_audit(&self, outcome: &str) {
        self.audit_records.with_label_values(&[outcome]).inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.inc();
    }

    pub fn request_started(&self) {
        self.active_requests.inc();
    }

    pub fn request_finished(&self) {
        self.active_requests.dec();
    }

    pub fn set_pooled_clients(&self, count: usize) {
        self.pooled_clients.set(count as i64);
    }

    pub fn upstream_request_count(&self, cluster: &str, outcome: &str) -> u64 {
        self.upstream_requests
            .with_label_values(&[cluster, outcome])
            .get()
    }

    pub fn auth_failure_count(&self, reason: &str) -> u64 {
        self.auth_failures.with_label_values(&[reason]).get()
    }

    pub fn access_denied_count(&self) -> u64 {
        self.access_denied.get()
    }

    pub fn active_request_count(&self) -> i64 {
        self.active_requests.get()
    }

    pub fn pooled_client_count(&self) -> i64 {
        self.pooled_clients.get()
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
