//! Runtime counters
//!
//! Six monotonically increasing counters, all lock-free atomics, shared by
//! every front-end. The DoH endpoint renders them as JSON (`/metrics`) and
//! as Prometheus text exposition (`/metrics/prometheus`).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters
///
/// # Thread Safety
///
/// All increments use relaxed atomics; the snapshot is not a consistent
/// cut across counters and does not need to be.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    doh_queries: AtomicU64,
    dot_queries: AtomicU64,
    sni_connections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Total DoH queries received
    pub doh_queries: u64,
    /// Total DoT queries received
    pub dot_queries: u64,
    /// Total SNI relay connections accepted
    pub sni_connections: u64,
    /// Response cache hits
    pub cache_hits: u64,
    /// Response cache misses
    pub cache_misses: u64,
    /// Errors across all front-ends
    pub errors: u64,
}

impl GatewayMetrics {
    /// Create a zeroed counter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a DoH query
    pub fn inc_doh_queries(&self) {
        self.doh_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a DoT query
    pub fn inc_dot_queries(&self) {
        self.dot_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted SNI relay connection
    pub fn inc_sni_connections(&self) {
        self.sni_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache miss
    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            doh_queries: self.doh_queries.load(Ordering::Relaxed),
            dot_queries: self.dot_queries.load(Ordering::Relaxed),
            sni_connections: self.sni_connections.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Render in Prometheus text exposition format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);

        let counters: [(&str, &str, u64); 6] = [
            ("snigw_doh_queries_total", "Total number of DoH queries", self.doh_queries),
            ("snigw_dot_queries_total", "Total number of DoT queries", self.dot_queries),
            (
                "snigw_sni_connections_total",
                "Total number of SNI connections",
                self.sni_connections,
            ),
            ("snigw_cache_hits_total", "Total number of cache hits", self.cache_hits),
            ("snigw_cache_misses_total", "Total number of cache misses", self.cache_misses),
            ("snigw_errors_total", "Total number of errors", self.errors),
        ];

        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {name} {help}\n"));
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {value}\n"));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = GatewayMetrics::new();
        metrics.inc_doh_queries();
        metrics.inc_doh_queries();
        metrics.inc_dot_queries();
        metrics.inc_sni_connections();
        metrics.inc_cache_hits();
        metrics.inc_cache_misses();
        metrics.inc_errors();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.doh_queries, 2);
        assert_eq!(snapshot.dot_queries, 1);
        assert_eq!(snapshot.sni_connections, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_json_field_names() {
        let metrics = GatewayMetrics::new();
        metrics.inc_cache_hits();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["cache_hits"], 1);
        assert_eq!(json["doh_queries"], 0);
        assert!(json.get("sni_connections").is_some());
        assert!(json.get("errors").is_some());
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = GatewayMetrics::new();
        metrics.inc_sni_connections();
        metrics.inc_sni_connections();

        let text = metrics.snapshot().to_prometheus();
        assert!(text.contains("# HELP snigw_sni_connections_total"));
        assert!(text.contains("# TYPE snigw_sni_connections_total counter"));
        assert!(text.contains("snigw_sni_connections_total 2\n"));
        assert!(text.contains("snigw_errors_total 0\n"));
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;

        let metrics = Arc::new(GatewayMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    m.inc_doh_queries();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().doh_queries, 8000);
    }
}
