// * Operations: structured logging and Prometheus metrics

pub mod telemetry;

// * Re-exports for convenient access
pub use telemetry::{
    deprecation_count, get_metrics_string, init_tracing, init_tracing_pretty,
    init_tracing_with_level, initialize_counters, metrics_content_type, record_deprecation,
    record_submission,
};
