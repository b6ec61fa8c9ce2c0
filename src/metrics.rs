/// Prometheus metrics for the HTTP surface and the graph store
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ErrorCode;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for HTTP request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// First path segment, e.g. "loans"
    pub resource: String,
    pub method: String,
    /// Numeric status code
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub resource: String,
}

/// Labels for graph store metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryLabels {
    /// "select", "ask", "update", "load" or "dump"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub code: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Total HTTP requests by resource, method and status
    pub http_requests_total: Family<RequestLabels, Counter>,

    /// Request duration in seconds by resource
    pub http_request_duration_seconds: Family<ResourceLabels, Histogram>,

    /// Requests currently being served
    pub http_active_requests: Gauge,

    /// Graph store operations by kind
    pub graph_queries_total: Family<QueryLabels, Counter>,

    /// API errors by code
    pub errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<ResourceLabels, Histogram>::new_with_constructor(|| {
                // 1ms .. ~4s
                Histogram::new(exponential_buckets(0.001, 2.5, 10))
            });
        registry.register(
            "http_request_duration_seconds",
            "Request latency histogram in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_active_requests = Gauge::default();
        registry.register(
            "http_active_requests",
            "Number of requests currently being processed",
            http_active_requests.clone(),
        );

        let graph_queries_total = Family::<QueryLabels, Counter>::default();
        registry.register(
            "graph_queries",
            "Total number of graph store operations",
            graph_queries_total.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "errors",
            "Total number of API errors by code",
            errors_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            http_requests_total,
            http_request_duration_seconds,
            http_active_requests,
            graph_queries_total,
            errors_total,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(err) = encode(&mut buffer, &registry) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_request(&self, resource: &str, method: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .get_or_create(&RequestLabels {
                resource: resource.to_string(),
                method: method.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.http_request_duration_seconds
            .get_or_create(&ResourceLabels {
                resource: resource.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_graph_query(&self, kind: &str) {
        self.graph_queries_total
            .get_or_create(&QueryLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_error(&self, code: ErrorCode) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                code: code.as_str().to_string(),
            })
            .inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Times one HTTP request; records on [`RequestMetrics::finish`] or drop
pub struct RequestMetrics {
    resource: String,
    method: String,
    start: Instant,
    completed: bool,
}

impl RequestMetrics {
    pub fn new(resource: &str, method: &str) -> Self {
        METRICS.http_active_requests.inc();
        Self {
            resource: resource.to_string(),
            method: method.to_string(),
            start: Instant::now(),
            completed: false,
        }
    }

    pub fn finish(mut self, status: u16) {
        self.complete(status);
    }

    fn complete(&mut self, status: u16) {
        METRICS.record_request(&self.resource, &self.method, status, self.start.elapsed());
        METRICS.http_active_requests.dec();
        self.completed = true;
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        if !self.completed {
            // the handler future was cancelled before producing a response
            self.complete(499);
        }
    }
}

/// Metric label for a request path: its first segment, or "root"
pub fn resource_label(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("root")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_families_are_exported() {
        let collector = MetricsCollector::new();
        collector.record_request("loans", "GET", 200, Duration::from_millis(3));
        collector.record_graph_query("select");
        collector.record_error(ErrorCode::Conflict);
        let output = collector.encode();

        assert!(output.contains("http_requests_total"));
        assert!(output.contains("http_request_duration_seconds"));
        assert!(output.contains("graph_queries_total{kind=\"select\"} 1"));
        assert!(output.contains("errors_total{code=\"conflict\"} 1"));
    }

    #[test]
    fn request_labels() {
        let collector = MetricsCollector::new();
        collector.record_request("equipments", "POST", 201, Duration::from_millis(1));
        collector.record_request("equipments", "POST", 201, Duration::from_millis(1));
        let output = collector.encode();
        assert!(output.contains("resource=\"equipments\""));
        assert!(output.contains("method=\"POST\""));
        assert!(output.contains("status=\"201\"} 2"));
    }

    #[test]
    fn resource_labels_from_paths() {
        assert_eq!(resource_label("/loans/123/return"), "loans");
        assert_eq!(resource_label("/"), "root");
        assert_eq!(resource_label("/analytics"), "analytics");
    }

    #[test]
    fn dropped_guard_still_records() {
        let before = METRICS.encode();
        assert!(!before.contains("resource=\"guard-drop-test\""));
        drop(RequestMetrics::new("guard-drop-test", "GET"));
        let after = METRICS.encode();
        assert!(after.contains("resource=\"guard-drop-test\""));
        assert!(after.contains("status=\"499\""));
    }
}
