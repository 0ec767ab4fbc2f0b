// * Server-side sink for client deprecation reports
// * Validates the wire payload, bounds label cardinality and feeds the Prometheus counters

pub mod allow_list;
pub mod classify;
pub mod ingest;
pub mod rate_limit;
pub mod server;

// * Re-exports for convenient access
pub use allow_list::{AllowList, AllowListError};
pub use classify::{classify_key, OverflowPolicy};
pub use ingest::{DeprecationSink, SinkError, SubmitSummary};
pub use rate_limit::{ClientIdentity, RateLimitError, SubmissionRateLimiter};
pub use server::{
    extract_data, resolve_identity, start_sink_server, IdentityRules, ServerError,
    SinkServerHandle,
};
