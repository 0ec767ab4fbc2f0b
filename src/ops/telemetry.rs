// * Telemetry - JSON Logging and Prometheus Metrics
// * Provides structured logging and the deprecation counters scraped from the sink

use crate::config::constants::{METRIC_HELP, METRIC_NAME};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

lazy_static! {
    // * Client-reported deprecations, labelled by site database and (possibly remapped) id
    pub static ref JS_DEPRECATION_COUNT: IntCounterVec = register_int_counter_vec!(
        METRIC_NAME,
        METRIC_HELP,
        &["db", "deprecation_id"]
    ).expect("! CRITICAL: Failed to register deprecation counter");

    // * Submissions received by the sink, by outcome
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "deprecation_collector_submissions_total",
        "Deprecation reports received by outcome",
        &["outcome"]
    ).expect("! CRITICAL: Failed to register submission counter");
}

/// Initializes the tracing subscriber with JSON formatting
///
/// # Example
/// ```ignore
/// use deprecation_collector::ops::telemetry;
///
/// telemetry::init_tracing();
/// tracing::info!(id = "discourse.fake", "Deprecation tracked");
/// ```
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Initializes tracing with custom log level
pub fn init_tracing_with_level(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initializes tracing with pretty formatting (for development)
pub fn init_tracing_pretty() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().pretty())
        .init();
}

/// Returns the current metrics in Prometheus text format
pub fn get_metrics_string() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Content type of [`get_metrics_string`]
pub fn metrics_content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Adds `value` occurrences of `deprecation_id` for a site, saturating at `u64::MAX`
pub fn record_deprecation(db: &str, deprecation_id: &str, value: u64) {
    let counter = JS_DEPRECATION_COUNT.with_label_values(&[db, deprecation_id]);
    // * The underlying atomic wraps on overflow; a counter must never go backwards
    let headroom = u64::MAX - counter.get();
    counter.inc_by(value.min(headroom));
}

/// Current counter value, mainly for diagnostics and tests
pub fn deprecation_count(db: &str, deprecation_id: &str) -> u64 {
    JS_DEPRECATION_COUNT
        .with_label_values(&[db, deprecation_id])
        .get()
}

/// Creates every counter at zero so `rate()` works from the first scrape
pub fn initialize_counters<'a>(db: &str, ids: impl IntoIterator<Item = &'a str>) -> usize {
    let mut initialized = 0;
    for id in ids {
        JS_DEPRECATION_COUNT.with_label_values(&[db, id]).inc_by(0);
        initialized += 1;
    }
    initialized
}

/// Records a sink submission outcome
pub fn record_submission(outcome: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}
