// * Configuration Constants
// * Central location for all fixed thresholds, paths and bucket names

use std::time::Duration;

// * Quiet interval before a scheduled flush fires
pub const FLUSH_DEBOUNCE_MS: u64 = 10_000;

// * Relative path the beacon posts to, and the sink serves
pub const COLLECTOR_ENDPOINT_PATH: &str = "/deprecation-collector/log";

// * Form field carrying the JSON-encoded counts
pub const DATA_FIELD: &str = "data";

// * Maximum number of keys accepted in a single submission
pub const MAX_REPORTED_KEYS: usize = 20;

// * Largest per-key count a single submission may report; larger values are skipped
pub const MAX_REPORTED_COUNT: u64 = 1_000_000;

// * Accepted submissions per client within one rate limit window
pub const LOGS_PER_WINDOW: u32 = 2;

// * Rate limit window length in seconds
pub const RATE_LIMIT_WINDOW_SECS: u64 = 10;

// * Namespace prefix shared by every host-core identifier
pub const CORE_NAMESPACE_PREFIX: &str = "discourse.";

// * Known critical identifier matched exactly by the notifier
pub const CRITICAL_DEPRECATION_ID: &str = "discourse.modal-controllers";

// * Overflow buckets for identifiers outside the allow-list
pub const OVERFLOW_BUCKET: &str = "_other";
pub const OVERFLOW_BUCKET_CORE: &str = "_other_discourse";

// * Global notice shown to admins on the first critical deprecation
pub const CRITICAL_NOTICE_ID: &str = "critical-deprecation";
pub const CRITICAL_NOTICE_DISMISS_DAYS: u64 = 3;

// * Prometheus counter name and help text
pub const METRIC_NAME: &str = "js_deprecation_count";
pub const METRIC_HELP: &str = "js deprecations reported by clients";

// * Default listen port for the sink server
pub const DEFAULT_SINK_PORT: u16 = 9000;

// * Header carrying the authenticated user id, when the host sets one
pub const DEFAULT_USER_ID_HEADER: &str = "x-current-user-id";

pub fn flush_debounce() -> Duration {
    Duration::from_millis(FLUSH_DEBOUNCE_MS)
}

pub fn rate_limit_window() -> Duration {
    Duration::from_secs(RATE_LIMIT_WINDOW_SECS)
}
