// * Per-client submission rate limiting
// * At most LOGS_PER_WINDOW accepted submissions in any rolling window, keyed by user id or client address

use crate::config::constants::{rate_limit_window, LOGS_PER_WINDOW};
use lazy_static::lazy_static;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;

// * Redis key prefix for shared accept logs
const RATELIMIT_PREFIX: &str = "deprecation_collector_report";

// * Prune idle local logs once the table grows past this
const LOCAL_PRUNE_THRESHOLD: usize = 10_000;

lazy_static! {
    // * Sliding log over a sorted set: drop expired accepts, admit if room, record and refresh TTL.
    // * One script call so a partial failure never leaves a key without expiry.
    static ref SLIDING_LOG_SCRIPT: Script = Script::new(
        r"
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
        if redis.call('ZCARD', KEYS[1]) >= tonumber(ARGV[3]) then
            return 0
        end
        redis.call('ZADD', KEYS[1], now, ARGV[4])
        redis.call('PEXPIRE', KEYS[1], window)
        return 1
        "
    );
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Rate limit exceeded, retry after delay")]
    RateLimitExceeded,
}

// * Who a submission is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    User(String),
    Address(IpAddr),
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::User(id) => write!(f, "user:{}", id),
            ClientIdentity::Address(addr) => write!(f, "ip:{}", addr),
        }
    }
}

// * Computes a hash of the identity for Redis key generation
fn compute_identity_hash(identity: &ClientIdentity) -> u64 {
    xxh64(identity.to_string().as_bytes(), 0)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

// * SubmissionRateLimiter keeps a shared Redis log when configured, else an in-process log per identity
pub struct SubmissionRateLimiter {
    redis: Option<ConnectionManager>,
    local: Mutex<HashMap<ClientIdentity, VecDeque<Instant>>>,
    limit: u32,
    sequence: AtomicU64,
}

impl fmt::Debug for SubmissionRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionRateLimiter")
            .field("redis", &self.redis.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

impl SubmissionRateLimiter {
    // * Creates a new limiter with optional Redis connection
    pub async fn new(redis_url: Option<&str>) -> Result<Self, RateLimitError> {
        let redis = if let Some(url) = redis_url {
            let client = redis::Client::open(url)?;
            let manager = ConnectionManager::new(client).await?;
            info!("Submission rate limiter using Redis backend");
            Some(manager)
        } else {
            None
        };

        Ok(Self::with_redis(redis))
    }

    // * In-process limiter only
    pub fn local() -> Self {
        Self::with_redis(None)
    }

    fn with_redis(redis: Option<ConnectionManager>) -> Self {
        Self {
            redis,
            local: Mutex::new(HashMap::new()),
            limit: LOGS_PER_WINDOW,
            sequence: AtomicU64::new(0),
        }
    }

    // * Returns the Redis key holding an identity's accept log
    pub fn redis_key(identity: &ClientIdentity) -> String {
        format!("{}:{}", RATELIMIT_PREFIX, compute_identity_hash(identity))
    }

    // * Consumes one submission for the identity, or fails without side effect
    pub async fn check(&self, identity: &ClientIdentity) -> Result<(), RateLimitError> {
        match self.redis.clone() {
            Some(redis) => self.check_shared(redis, identity).await,
            None => self.check_local(identity),
        }
    }

    async fn check_shared(
        &self,
        mut redis: ConnectionManager,
        identity: &ClientIdentity,
    ) -> Result<(), RateLimitError> {
        let now = unix_millis();
        // * Members must be unique per accept, even within one millisecond
        let member = format!(
            "{}-{}-{}",
            now,
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );

        let admitted: i64 = SLIDING_LOG_SCRIPT
            .key(Self::redis_key(identity))
            .arg(now)
            .arg(rate_limit_window().as_millis() as u64)
            .arg(self.limit)
            .arg(member)
            .invoke_async(&mut redis)
            .await?;

        if admitted == 0 {
            warn!(identity = %identity, "Submission rate limit exceeded");
            return Err(RateLimitError::RateLimitExceeded);
        }
        Ok(())
    }

    fn check_local(&self, identity: &ClientIdentity) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let window = rate_limit_window();
        let mut logs = self.local.lock().unwrap_or_else(PoisonError::into_inner);

        if logs.len() > LOCAL_PRUNE_THRESHOLD {
            logs.retain(|_, accepted| {
                accepted
                    .back()
                    .is_some_and(|last| now.duration_since(*last) < window)
            });
            debug!(remaining = logs.len(), "Pruned idle rate limit logs");
        }

        let accepted = logs.entry(identity.clone()).or_default();
        // * An accept leaves the window once a full window has elapsed since it
        while accepted
            .front()
            .is_some_and(|first| now.duration_since(*first) >= window)
        {
            accepted.pop_front();
        }

        if accepted.len() >= self.limit as usize {
            warn!(identity = %identity, count = accepted.len(), "Submission rate limit exceeded");
            return Err(RateLimitError::RateLimitExceeded);
        }

        accepted.push_back(now);
        Ok(())
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn test_identity_display() {
        assert_eq!(ClientIdentity::User("7".into()).to_string(), "user:7");
        assert_eq!(
            ClientIdentity::Address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).to_string(),
            "ip:10.0.0.1"
        );
    }

    #[test]
    fn test_identity_hash_consistency() {
        let a = ClientIdentity::User("1".into());
        let b = ClientIdentity::User("1".into());
        let c = ClientIdentity::User("2".into());
        assert_eq!(compute_identity_hash(&a), compute_identity_hash(&b));
        assert_ne!(compute_identity_hash(&a), compute_identity_hash(&c));
        assert!(SubmissionRateLimiter::redis_key(&a).starts_with("deprecation_collector_report:"));
    }

    #[tokio::test]
    async fn test_limit_per_identity_without_redis() {
        let limiter = SubmissionRateLimiter::new(None).await.unwrap();
        let alice = ClientIdentity::User("alice".into());
        let bob = ClientIdentity::Address(IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_ok());
        assert!(matches!(
            limiter.check(&alice).await,
            Err(RateLimitError::RateLimitExceeded)
        ));

        // * Other clients keep their own window
        assert!(limiter.check(&bob).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_limit_available_again_after_window() {
        let limiter = SubmissionRateLimiter::local();
        let alice = ClientIdentity::User("alice".into());

        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_err());

        tokio::time::advance(Duration::from_millis(10_500)).await;

        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_rolling() {
        let limiter = SubmissionRateLimiter::local();
        let alice = ClientIdentity::User("alice".into());

        assert!(limiter.check(&alice).await.is_ok()); // t=0
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(&alice).await.is_ok()); // t=5

        tokio::time::advance(Duration::from_millis(4_900)).await;
        assert!(limiter.check(&alice).await.is_err()); // t=9.9, both accepts still inside

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.check(&alice).await.is_ok()); // t=10, first accept has left
        assert!(limiter.check(&alice).await.is_err()); // t=5 and t=10 fill the window

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(&alice).await.is_ok()); // t=15
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_checks_are_not_recorded() {
        let limiter = SubmissionRateLimiter::local();
        let alice = ClientIdentity::User("alice".into());

        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_ok());
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(limiter.check(&alice).await.is_err());
        }

        // * Only the two accepts at t=0 occupied the window
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check(&alice).await.is_ok());
        assert!(limiter.check(&alice).await.is_ok());
    }
}
