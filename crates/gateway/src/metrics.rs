/*!
 * Metrics Module
 *
 * Prometheus meters for the two rates the gateway reports:
 *
 * - `mistral_requests_total{instance}` - HTTP requests received, accepted
 *   or declined, including /health probes
 * - `mistral_messages_total{instance}` - metric batches acknowledged by
 *   the broker
 *
 * The `instance` label carries the configured instance name so several
 * gateways can share one scrape target. Metrics are exposed on
 * `GET /metrics` in Prometheus text format.
 */

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, TextEncoder, register_int_counter_vec};

lazy_static::lazy_static! {
    /// All HTTP requests, accepted or declined
    pub static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "mistral_requests_total",
        "Total number of HTTP requests received",
        &["instance"]
    )
    .expect("Failed to register mistral_requests_total metric");

    /// Batches acknowledged by the broker
    pub static ref MESSAGES: IntCounterVec = register_int_counter_vec!(
        "mistral_messages_total",
        "Total number of metric batches acknowledged by the broker",
        &["instance"]
    )
    .expect("Failed to register mistral_messages_total metric");
}

/// Per-instance meter handles, resolved once at startup and cloned into
/// every component that ticks them.
#[derive(Clone)]
pub struct Meters {
    pub requests: IntCounter,
    pub messages: IntCounter,
}

impl Meters {
    pub fn for_instance(instance: &str) -> Self {
        let label = if instance.is_empty() { "default" } else { instance };
        Meters {
            requests: REQUESTS.with_label_values(&[label]),
            messages: MESSAGES.with_label_values(&[label]),
        }
    }
}

/// Render all registered metrics in Prometheus exposition format
pub fn render_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output was not valid UTF-8")
}
