//! Metrics collection and export for Fanout.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use fanout_core::{PublishReport, Registry, RegistryStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const PUBLISHES_TOTAL: &str = "fanout_publishes_total";
    pub const PUBLISHED_BYTES: &str = "fanout_published_bytes_total";
    pub const DELIVERIES_TOTAL: &str = "fanout_deliveries_total";
    pub const DROPPED_TOTAL: &str = "fanout_dropped_total";
    pub const PRUNED_TOTAL: &str = "fanout_pruned_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "fanout_subscriptions_total";
    pub const STREAMS_ACTIVE: &str = "fanout_streams_active";
    pub const TOPICS_ACTIVE: &str = "fanout_topics_active";
    pub const SUBSCRIBERS_REGISTERED: &str = "fanout_subscribers_registered";
    pub const ERRORS_TOTAL: &str = "fanout_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::PUBLISHES_TOTAL, "Total number of publish requests");
    metrics::describe_counter!(names::PUBLISHED_BYTES, "Total payload bytes published");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Messages queued on subscriber endpoints"
    );
    metrics::describe_counter!(
        names::DROPPED_TOTAL,
        "Messages dropped because a subscriber buffer was full"
    );
    metrics::describe_counter!(names::PRUNED_TOTAL, "Subscriber endpoints removed");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of topic subscriptions"
    );
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Currently open event streams");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Topics with a subscriber list");
    metrics::describe_gauge!(
        names::SUBSCRIBERS_REGISTERED,
        "Subscriber endpoints registered across all topics"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of rejected requests");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record the outcome of a publish.
///
/// Registry gauges are refreshed when the publish removed endpoints.
pub fn record_publish(bytes: usize, report: &PublishReport, registry: &Registry) {
    counter!(names::PUBLISHES_TOTAL).increment(1);
    counter!(names::PUBLISHED_BYTES).increment(bytes as u64);
    counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
    counter!(names::DROPPED_TOTAL).increment(report.dropped as u64);
    if report.pruned > 0 {
        counter!(names::PRUNED_TOTAL).increment(report.pruned as u64);
        set_registry_stats(registry.stats());
    }
}

/// Record a reaper sweep.
pub fn record_sweep(pruned: usize, stats: RegistryStats) {
    counter!(names::PRUNED_TOTAL).increment(pruned as u64);
    set_registry_stats(stats);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Update registry gauges.
pub fn set_registry_stats(stats: RegistryStats) {
    gauge!(names::TOPICS_ACTIVE).set(stats.topic_count as f64);
    gauge!(names::SUBSCRIBERS_REGISTERED).set(stats.subscriber_count as f64);
}

/// Record a rejected request.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks an open event stream for its lifetime.
pub struct StreamMetricsGuard;

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording an open stream.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::STREAMS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for StreamMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn gauge_value(rendered: &str, name: &str) -> f64 {
        rendered
            .lines()
            .find(|line| line.split_whitespace().next() == Some(name))
            .and_then(|line| line.split_whitespace().last())
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(|| panic!("{name} not rendered:\n{rendered}"))
    }

    fn recorder() -> PrometheusRecorder {
        PrometheusBuilder::new().build_recorder()
    }

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; recording must be a no-op.
        let _guard = StreamMetricsGuard::new();
        record_publish(
            5,
            &PublishReport {
                delivered: 2,
                ..Default::default()
            },
            &Registry::new(),
        );
        record_error("test");
    }

    #[test]
    fn test_publish_that_prunes_refreshes_gauges() {
        let recorder = recorder();
        let handle = recorder.handle();
        let registry = Registry::new();
        let _kept = registry.subscribe("a");
        drop(registry.subscribe("b"));

        metrics::with_local_recorder(&recorder, || {
            set_registry_stats(registry.stats());
            let report = registry.publish("b", "x");
            assert_eq!(report.pruned, 1);
            record_publish(1, &report, &registry);
        });

        let rendered = handle.render();
        assert_eq!(gauge_value(&rendered, names::TOPICS_ACTIVE), 1.0);
        assert_eq!(gauge_value(&rendered, names::SUBSCRIBERS_REGISTERED), 1.0);
    }

    #[test]
    fn test_sweep_refreshes_gauges() {
        let recorder = recorder();
        let handle = recorder.handle();
        let registry = Registry::new();
        drop(registry.subscribe("a"));

        metrics::with_local_recorder(&recorder, || {
            set_registry_stats(registry.stats());
            record_sweep(registry.prune(), registry.stats());
        });

        let rendered = handle.render();
        assert_eq!(gauge_value(&rendered, names::TOPICS_ACTIVE), 0.0);
        assert_eq!(gauge_value(&rendered, names::SUBSCRIBERS_REGISTERED), 0.0);
    }
}
