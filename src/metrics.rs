//! Prometheus metrics for the pub/sub bridge and usage reporting.
//!
//! # Metrics Exposed
//!
//! - `pubsub_events_published_total` - Events handed to the publish client
//! - `pubsub_events_delivered_total` - Listener invocations for incoming events
//! - `pubsub_malformed_messages_total` - Incoming messages that failed to decode
//! - `usage_traces_recorded_total` - Operation traces buffered for reporting
//! - `usage_reports_total` - Report transmissions by outcome (`sent`, `failed`)
//! - `usage_report_duration_seconds` - Report transmission latency

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static METRICS: Lazy<PluginMetrics> = Lazy::new(PluginMetrics::new);

/// Counters and histograms shared by every plugin in the process.
#[derive(Clone)]
pub struct PluginMetrics {
    pub events_published: IntCounter,
    pub events_delivered: IntCounter,
    pub malformed_messages: IntCounter,
    pub traces_recorded: IntCounter,
    pub reports: IntCounterVec,
    pub report_duration: Histogram,
}

impl PluginMetrics {
    fn new() -> Self {
        Self {
            events_published: register_int_counter!(
                "pubsub_events_published_total",
                "Total number of events handed to the publish client"
            )
            .expect("metric can be created"),

            events_delivered: register_int_counter!(
                "pubsub_events_delivered_total",
                "Total number of listener invocations for incoming events"
            )
            .expect("metric can be created"),

            malformed_messages: register_int_counter!(
                "pubsub_malformed_messages_total",
                "Total number of incoming messages that could not be decoded"
            )
            .expect("metric can be created"),

            traces_recorded: register_int_counter!(
                "usage_traces_recorded_total",
                "Total number of operation traces buffered for reporting"
            )
            .expect("metric can be created"),

            reports: register_int_counter_vec!(
                "usage_reports_total",
                "Total number of usage report transmissions",
                &["outcome"]
            )
            .expect("metric can be created"),

            report_duration: register_histogram!(
                "usage_report_duration_seconds",
                "Usage report transmission duration in seconds",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("metric can be created"),
        }
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        &METRICS
    }

    pub fn record_report_sent(&self, duration_secs: f64) {
        self.reports.with_label_values(&["sent"]).inc();
        self.report_duration.observe(duration_secs);
    }

    pub fn record_report_failed(&self, duration_secs: f64) {
        self.reports.with_label_values(&["failed"]).inc();
        self.report_duration.observe(duration_secs);
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports.with_label_values(&["sent"]).get()
    }

    pub fn reports_failed(&self) -> u64 {
        self.reports.with_label_values(&["failed"]).get()
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
