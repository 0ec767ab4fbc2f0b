// * Submission handling for the deprecation sink
// * Rate limit, parse, validate size, remap unknown keys, increment counters

use crate::config::constants::{MAX_REPORTED_COUNT, MAX_REPORTED_KEYS};
use crate::ops::telemetry;
use crate::sink::allow_list::AllowList;
use crate::sink::classify::{classify_key, OverflowPolicy};
use crate::sink::rate_limit::{ClientIdentity, RateLimitError, SubmissionRateLimiter};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("param is missing or the value is empty: data")]
    MissingParameter,

    #[error("{0}")]
    InvalidParameters(String),

    #[error("You've performed this action too many times. Please wait and try again.")]
    RateLimited,

    #[error("Rate limit backend unavailable: {0}")]
    RateLimitBackend(String),
}

impl SinkError {
    pub fn status_code(&self) -> u16 {
        match self {
            SinkError::MissingParameter | SinkError::InvalidParameters(_) => 400,
            SinkError::RateLimited => 429,
            SinkError::RateLimitBackend(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SinkError::MissingParameter | SinkError::InvalidParameters(_) => "invalid_parameters",
            SinkError::RateLimited => "rate_limit",
            SinkError::RateLimitBackend(_) => "server_error",
        }
    }

    fn cannot_parse() -> Self {
        SinkError::InvalidParameters("Cannot parse JSON".to_string())
    }

    fn too_many() -> Self {
        SinkError::InvalidParameters("Too many deprecations reported".to_string())
    }
}

impl From<RateLimitError> for SinkError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::RateLimitExceeded => SinkError::RateLimited,
            RateLimitError::RedisError(e) => SinkError::RateLimitBackend(e.to_string()),
        }
    }
}

/// What one accepted submission added to the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub counted: BTreeMap<String, u64>,
    pub skipped: usize,
}

pub struct DeprecationSink {
    allow_list: AllowList,
    policy: OverflowPolicy,
    db_label: String,
    limiter: SubmissionRateLimiter,
}

impl DeprecationSink {
    pub fn new(
        allow_list: AllowList,
        policy: OverflowPolicy,
        db_label: impl Into<String>,
        limiter: SubmissionRateLimiter,
    ) -> Self {
        let sink = Self {
            allow_list,
            policy,
            db_label: db_label.into(),
            limiter,
        };
        let buckets: &[&str] = sink.policy.buckets();
        let initialized = telemetry::initialize_counters(
            &sink.db_label,
            sink.allow_list.iter().chain(buckets.iter().copied()),
        );
        info!(db = %sink.db_label, counters = initialized, "Deprecation counters initialized");
        sink
    }

    pub fn db_label(&self) -> &str {
        &self.db_label
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Handles one submission. Nothing is counted unless the whole payload is valid.
    pub async fn submit(
        &self,
        identity: &ClientIdentity,
        data: Option<&str>,
    ) -> Result<SubmitSummary, SinkError> {
        let result = self.process(identity, data).await;
        telemetry::record_submission(match &result {
            Ok(_) => "accepted",
            Err(SinkError::RateLimited) => "rate_limited",
            Err(SinkError::RateLimitBackend(_)) => "error",
            Err(_) => "invalid",
        });
        result
    }

    async fn process(
        &self,
        identity: &ClientIdentity,
        data: Option<&str>,
    ) -> Result<SubmitSummary, SinkError> {
        self.limiter.check(identity).await?;

        let raw = data
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(SinkError::MissingParameter)?;

        let reported = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return Err(SinkError::cannot_parse()),
        };

        if reported.len() > MAX_REPORTED_KEYS {
            debug!(identity = %identity, keys = reported.len(), "Oversized deprecation report rejected");
            return Err(SinkError::too_many());
        }

        let mut summary = SubmitSummary::default();
        for (key, value) in &reported {
            // * Only integers in 0..=MAX_REPORTED_COUNT count; anything else is skipped silently
            let Some(count) = value.as_u64().filter(|count| *count <= MAX_REPORTED_COUNT) else {
                summary.skipped += 1;
                continue;
            };
            let label = classify_key(key, &self.allow_list, self.policy);
            let total = summary.counted.entry(label.to_string()).or_insert(0);
            *total = total.saturating_add(count);
        }

        for (label, count) in &summary.counted {
            telemetry::record_deprecation(&self.db_label, label, *count);
        }

        debug!(
            identity = %identity,
            counted = summary.counted.len(),
            skipped = summary.skipped,
            "Deprecation report accepted"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::telemetry::deprecation_count;

    fn sink(db: &str) -> DeprecationSink {
        let allow_list: AllowList = ["deprecation.routes.add", "template-action"].into_iter().collect();
        DeprecationSink::new(
            allow_list,
            OverflowPolicy::SplitByNamespace,
            db,
            SubmissionRateLimiter::local(),
        )
    }

    fn user(id: &str) -> ClientIdentity {
        ClientIdentity::User(id.to_string())
    }

    #[tokio::test]
    async fn test_counts_initialized_for_allow_list() {
        let sink = sink("ingest_init_db");
        assert_eq!(deprecation_count(sink.db_label(), "template-action"), 0);
        assert_eq!(deprecation_count(sink.db_label(), "_other_discourse"), 0);
    }

    #[tokio::test]
    async fn test_non_integer_values_skipped() {
        let sink = sink("ingest_skip_db");
        let summary = sink
            .submit(&user("1"), Some(r#"{"template-action": "3", "deprecation.routes.add": 1.5, "discourse.x": -2}"#))
            .await
            .unwrap();

        assert!(summary.counted.is_empty());
        assert_eq!(summary.skipped, 3);
        assert_eq!(deprecation_count(sink.db_label(), "template-action"), 0);
    }

    #[tokio::test]
    async fn test_remapped_keys_merge_into_bucket() {
        let sink = sink("ingest_merge_db");
        let summary = sink
            .submit(&user("1"), Some(r#"{"unknown.a": 2, "unknown.b": 3}"#))
            .await
            .unwrap();

        assert_eq!(summary.counted.get("_other"), Some(&5));
        assert_eq!(deprecation_count(sink.db_label(), "_other"), 5);
    }

    #[tokio::test]
    async fn test_oversized_counts_skipped_without_overflow() {
        let sink = sink("ingest_huge_db");
        let summary = sink
            .submit(
                &user("1"),
                Some(r#"{"unknown.a": 18446744073709551615, "unknown.b": 1, "unknown.c": 1000001}"#),
            )
            .await
            .unwrap();

        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.counted.get("_other"), Some(&1));
        assert_eq!(deprecation_count(sink.db_label(), "_other"), 1);
    }

    #[tokio::test]
    async fn test_largest_accepted_counts_merge() {
        let sink = sink("ingest_cap_db");
        let summary = sink
            .submit(&user("1"), Some(r#"{"unknown.a": 1000000, "unknown.b": 1000000}"#))
            .await
            .unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.counted.get("_other"), Some(&2_000_000));
    }

    #[tokio::test]
    async fn test_missing_data() {
        let sink = sink("ingest_missing_db");
        assert_eq!(
            sink.submit(&user("1"), None).await,
            Err(SinkError::MissingParameter)
        );
        assert_eq!(
            sink.submit(&user("2"), Some("  ")).await,
            Err(SinkError::MissingParameter)
        );
    }

    #[tokio::test]
    async fn test_non_object_json_rejected() {
        let sink = sink("ingest_array_db");
        let err = sink.submit(&user("1"), Some("[1, 2]")).await.unwrap_err();
        assert_eq!(err, SinkError::InvalidParameters("Cannot parse JSON".into()));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(SinkError::RateLimited.status_code(), 429);
        assert_eq!(SinkError::RateLimited.error_type(), "rate_limit");
        assert_eq!(
            SinkError::from(RateLimitError::RateLimitExceeded),
            SinkError::RateLimited
        );
    }
}
