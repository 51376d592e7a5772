//! Prometheus metrics for the streaming engine.
//!
//! Gauges mirror [`StreamerStatus`] snapshots and are refreshed on every
//! scrape. Request counters are bumped by the handlers as responses go out.

use mediarelay_core::StreamerStatus;
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Prometheus exporter for engine state and HTTP traffic
#[derive(Debug)]
pub struct StreamMetrics {
    registry: Registry,

    // Per-connection load
    workload: IntGaugeVec,
    cdn_redirects: IntGaugeVec,

    // Descriptor cache
    cached_descriptors: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_sweeps: IntGauge,

    // Media sessions
    active_sessions: IntGauge,
    sessions_created: IntGauge,

    uptime: IntGauge,
    responses: IntCounterVec,
}

impl StreamMetrics {
    /// Create and register every metric.
    ///
    /// # Errors
    ///
    /// Returns `prometheus::Error` if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let workload = IntGaugeVec::new(
            Opts::new(
                "mediarelay_connection_workload",
                "Streams currently served by each upstream connection",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(workload.clone()))?;

        let cdn_redirects = IntGaugeVec::new(
            Opts::new(
                "mediarelay_connection_cdn_redirects",
                "Downloads redirected to a CDN per upstream connection",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(cdn_redirects.clone()))?;

        let cached_descriptors = IntGauge::new(
            "mediarelay_cache_entries",
            "File descriptors currently cached",
        )?;
        registry.register(Box::new(cached_descriptors.clone()))?;

        let cache_hits = IntGauge::new("mediarelay_cache_hits", "Descriptor cache hits")?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses = IntGauge::new("mediarelay_cache_misses", "Descriptor cache misses")?;
        registry.register(Box::new(cache_misses.clone()))?;

        let cache_sweeps = IntGauge::new(
            "mediarelay_cache_sweeps",
            "Full descriptor cache sweeps performed",
        )?;
        registry.register(Box::new(cache_sweeps.clone()))?;

        let active_sessions = IntGauge::new(
            "mediarelay_media_sessions_active",
            "Authorized media sessions currently cached",
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let sessions_created = IntGauge::new(
            "mediarelay_media_sessions_created",
            "Media sessions created since start",
        )?;
        registry.register(Box::new(sessions_created.clone()))?;

        let uptime = IntGauge::new("mediarelay_uptime_seconds", "Seconds since the engine started")?;
        registry.register(Box::new(uptime.clone()))?;

        let responses = IntCounterVec::new(
            Opts::new("mediarelay_http_responses_total", "HTTP responses by route and status"),
            &["route", "status"],
        )?;
        registry.register(Box::new(responses.clone()))?;

        Ok(Self {
            registry,
            workload,
            cdn_redirects,
            cached_descriptors,
            cache_hits,
            cache_misses,
            cache_sweeps,
            active_sessions,
            sessions_created,
            uptime,
            responses,
        })
    }

    /// Copy an engine snapshot into the gauges
    #[allow(clippy::cast_possible_wrap)]
    pub fn update(&self, status: &StreamerStatus) {
        for connection in &status.connections {
            let label = connection.index.to_string();
            self.workload
                .with_label_values(&[label.as_str()])
                .set(connection.workload as i64);
            self.cdn_redirects
                .with_label_values(&[label.as_str()])
                .set(connection.cdn_redirects as i64);
        }

        self.cached_descriptors.set(status.cache.entries as i64);
        self.cache_hits.set(status.cache.hits as i64);
        self.cache_misses.set(status.cache.misses as i64);
        self.cache_sweeps.set(status.cache.sweeps as i64);
        self.active_sessions.set(status.sessions.active as i64);
        self.sessions_created.set(status.sessions.created as i64);
        self.uptime.set(status.uptime_secs as i64);
    }

    /// Count one response sent on `route`
    pub fn record_response(&self, route: &str, status: u16) {
        self.responses
            .with_label_values(&[route, status.to_string().as_str()])
            .inc();
    }

    /// Get Prometheus registry for serving metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use mediarelay_core::{CacheStats, ConnectionStatus, SessionStats};

    fn status() -> StreamerStatus {
        StreamerStatus {
            uptime_secs: 12,
            connections: vec![
                ConnectionStatus {
                    index: 0,
                    name: "memory-0".to_string(),
                    workload: 3,
                    cdn_redirects: 1,
                },
                ConnectionStatus {
                    index: 1,
                    name: "memory-1".to_string(),
                    workload: 0,
                    cdn_redirects: 0,
                },
            ],
            cache: CacheStats {
                entries: 5,
                hits: 9,
                misses: 5,
                sweeps: 0,
            },
            sessions: SessionStats {
                active: 2,
                created: 2,
                replaced: 0,
                invalidated: 0,
            },
        }
    }

    #[test]
    fn test_update_and_gather() {
        let metrics = StreamMetrics::new().unwrap();
        metrics.update(&status());
        metrics.record_response("stream", 206);
        metrics.record_response("stream", 206);

        let output = metrics.gather();
        assert!(output.contains("mediarelay_connection_workload{connection=\"0\"} 3"));
        assert!(output.contains("mediarelay_connection_cdn_redirects{connection=\"0\"} 1"));
        assert!(output.contains("mediarelay_cache_entries 5"));
        assert!(output.contains("mediarelay_media_sessions_active 2"));
        assert!(output.contains("mediarelay_http_responses_total{route=\"stream\",status=\"206\"} 2"));
    }
}
