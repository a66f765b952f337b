// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-window rate limiter keyed by request identity.
//!
//! ## Keys
//!
//! ```text
//! rl:{type}:{source}:{value}:{bucket}   # window counter, bucket = now / window_ms
//! rl:block:{type}:{source}:{value}      # hard block
//! ```
//!
//! One counter per identity source present on the request. The reported
//! count is the maximum across sources, so the most restrictive signal wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use super::clock::{Clock, SystemClock};
use super::config::{LimitConfig, LimitType};
use super::store::{BlockRecord, CounterStore, CounterStoreError};

/// Where an identity value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Ip,
    Session,
    User,
}

impl IdentitySource {
    pub const ALL: [IdentitySource; 3] = [
        IdentitySource::Ip,
        IdentitySource::Session,
        IdentitySource::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Ip => "ip",
            IdentitySource::Session => "session",
            IdentitySource::User => "user",
        }
    }
}

/// Identity values observed on one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub ip: Option<String>,
    pub session: Option<String>,
    pub user: Option<String>,
}

impl RequestIdentity {
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Non-empty value for `source`.
    pub fn value(&self, source: IdentitySource) -> Option<&str> {
        let value = match source {
            IdentitySource::Ip => self.ip.as_deref(),
            IdentitySource::Session => self.session.as_deref(),
            IdentitySource::User => self.user.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RateLimitResult {
    pub blocked: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds when the window (or block) ends.
    pub reset: u64,
}

impl RateLimitResult {
    fn allowed_full(config: LimitConfig, reset: u64) -> Self {
        Self {
            blocked: false,
            limit: config.max_requests,
            remaining: config.max_requests,
            reset,
        }
    }

    fn denied(config: LimitConfig, reset: u64) -> Self {
        Self {
            blocked: true,
            limit: config.max_requests,
            remaining: 0,
            reset,
        }
    }

    /// Whole seconds until `reset`, at least one.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset.saturating_sub(now_ms).div_ceil(1_000).max(1)
    }
}

/// Behaviour when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Allow the request with full quota.
    #[default]
    FailOpen,
    /// Reject the request.
    FailClosed,
}

/// Most restrictive count across identity sources.
pub fn max_count(counts: &[u64]) -> u64 {
    counts.iter().copied().max().unwrap_or(0)
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    sources: Vec<IdentitySource>,
    policies: HashMap<LimitType, FailurePolicy>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            sources: IdentitySource::ALL.to_vec(),
            policies: HashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Restrict which identity sources produce keys.
    pub fn with_sources(mut self, sources: Vec<IdentitySource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_failure_policy(mut self, limit: LimitType, policy: FailurePolicy) -> Self {
        self.policies.insert(limit, policy);
        self
    }

    pub fn failure_policy(&self, limit: LimitType) -> FailurePolicy {
        self.policies.get(&limit).copied().unwrap_or_default()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn identity_values<'a>(&self, identity: &'a RequestIdentity) -> Vec<(IdentitySource, &'a str)> {
        self.sources
            .iter()
            .filter_map(|source| identity.value(*source).map(|value| (*source, value)))
            .collect()
    }

    fn window_keys(&self, identity: &RequestIdentity, limit: LimitType, bucket: u64) -> Vec<String> {
        self.identity_values(identity)
            .into_iter()
            .map(|(source, value)| format!("rl:{limit}:{}:{value}:{bucket}", source.as_str()))
            .collect()
    }

    fn block_keys(&self, identity: &RequestIdentity, limit: LimitType) -> Vec<String> {
        self.identity_values(identity)
            .into_iter()
            .map(|(source, value)| format!("rl:block:{limit}:{}:{value}", source.as_str()))
            .collect()
    }

    /// Count the request and report whether it is over quota.
    ///
    /// Store errors are returned as-is.
    pub async fn check(
        &self,
        identity: &RequestIdentity,
        limit: LimitType,
    ) -> Result<RateLimitResult, CounterStoreError> {
        let config = limit.config();
        let now = self.clock.now_ms();
        let window_ms = config.window_ms.max(1);
        let bucket = now / window_ms;
        let window_end = (bucket + 1) * window_ms;

        let block_keys = self.block_keys(identity, limit);
        if block_keys.is_empty() {
            return Ok(RateLimitResult::allowed_full(config, window_end));
        }

        if let Some(block) = self.store.get_block(&block_keys).await? {
            if block.until > now {
                return Ok(RateLimitResult::denied(config, block.until));
            }
        }

        let keys = self.window_keys(identity, limit, bucket);
        let counts = self.store.incr_with_expiry(&keys, window_ms).await?;
        if counts.len() != keys.len() {
            return Err(CounterStoreError::ShortBatch {
                expected: keys.len(),
                got: counts.len(),
            });
        }
        let count = max_count(&counts);

        if count >= config.max_requests.saturating_mul(2) {
            let until = now.saturating_add(config.block_ms);
            let block = BlockRecord {
                until,
                reason: format!("{limit} limit exceeded {count} times in one window"),
            };
            self.store.set_block(&block_keys, &block).await?;
            tracing::warn!(limit = %limit, count, block_ms = config.block_ms, "Identity blocked");
            return Ok(RateLimitResult::denied(config, until));
        }

        Ok(RateLimitResult {
            blocked: count > config.max_requests,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(count),
            reset: window_end,
        })
    }

    /// Like [`RateLimiter::check`], but store errors resolve through the
    /// limit type's [`FailurePolicy`].
    pub async fn rate_limit(&self, identity: &RequestIdentity, limit: LimitType) -> RateLimitResult {
        match self.check(identity, limit).await {
            Ok(result) => result,
            Err(e) => {
                let config = limit.config();
                let reset = self.clock.now_ms().saturating_add(config.window_ms);
                let policy = self.failure_policy(limit);
                tracing::warn!(limit = %limit, error = %e, ?policy, "Rate limit store failure");
                match policy {
                    FailurePolicy::FailOpen => RateLimitResult::allowed_full(config, reset),
                    FailurePolicy::FailClosed => RateLimitResult::denied(config, reset),
                }
            }
        }
    }

    /// Block every key of `identity` for `duration_ms`.
    pub async fn block_identity(
        &self,
        identity: &RequestIdentity,
        limit: LimitType,
        duration_ms: u64,
        reason: impl Into<String>,
    ) -> Result<(), CounterStoreError> {
        let keys = self.block_keys(identity, limit);
        if keys.is_empty() {
            return Ok(());
        }
        let block = BlockRecord {
            until: self.clock.now_ms().saturating_add(duration_ms),
            reason: reason.into(),
        };
        self.store.set_block(&keys, &block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::store::InMemoryCounterStore;
    use async_trait::async_trait;

    const START: u64 = 1_700_000_000_000;

    /// Store that fails every call.
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn incr_with_expiry(&self, _: &[String], _: u64) -> Result<Vec<u64>, CounterStoreError> {
            Err(CounterStoreError::Unavailable("down".into()))
        }
        async fn get_block(&self, _: &[String]) -> Result<Option<BlockRecord>, CounterStoreError> {
            Err(CounterStoreError::Unavailable("down".into()))
        }
        async fn set_block(&self, _: &[String], _: &BlockRecord) -> Result<(), CounterStoreError> {
            Err(CounterStoreError::Unavailable("down".into()))
        }
    }

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        // Start on a window boundary for every limit type.
        let clock = Arc::new(ManualClock::new(START - START % (24 * 60 * 60 * 1_000)));
        let store = Arc::new(InMemoryCounterStore::new(1_000, clock.clone()));
        (RateLimiter::new(store).with_clock(clock.clone()), clock)
    }

    fn ip(addr: &str) -> RequestIdentity {
        RequestIdentity::default().with_ip(addr)
    }

    #[tokio::test]
    async fn sixth_auth_request_is_blocked() {
        let (limiter, _clock) = limiter();
        let id = ip("10.0.0.1");

        for expected in (0..5).rev() {
            let result = limiter.rate_limit(&id, LimitType::Auth).await;
            assert!(!result.blocked);
            assert_eq!(result.limit, 5);
            assert_eq!(result.remaining, expected);
        }

        let sixth = limiter.rate_limit(&id, LimitType::Auth).await;
        assert!(sixth.blocked);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn new_window_resets_quota() {
        let (limiter, clock) = limiter();
        let id = ip("10.0.0.1");
        for _ in 0..6 {
            limiter.rate_limit(&id, LimitType::Auth).await;
        }

        clock.advance(LimitType::Auth.config().window_ms);
        let result = limiter.rate_limit(&id, LimitType::Auth).await;
        assert!(!result.blocked);
        assert_eq!(result.remaining, result.limit - 1);
    }

    #[tokio::test]
    async fn most_restrictive_source_wins() {
        let (limiter, _clock) = limiter();
        let user_only = RequestIdentity::default().with_user("user-1");
        for _ in 0..4 {
            limiter.rate_limit(&user_only, LimitType::Auth).await;
        }

        // Fresh IP, same user: the user counter dominates.
        let both = ip("10.0.0.9").with_user("user-1");
        let result = limiter.rate_limit(&both, LimitType::Auth).await;
        assert_eq!(result.remaining, 0);
        assert!(!result.blocked);

        let result = limiter.rate_limit(&both, LimitType::Auth).await;
        assert!(result.blocked);
    }

    #[tokio::test]
    async fn limit_types_are_counted_separately() {
        let (limiter, _clock) = limiter();
        let id = ip("10.0.0.1");
        for _ in 0..6 {
            limiter.rate_limit(&id, LimitType::Auth).await;
        }
        let wallet = limiter.rate_limit(&id, LimitType::Wallet).await;
        assert!(!wallet.blocked);
        assert_eq!(wallet.remaining, 9);
    }

    #[tokio::test]
    async fn persistent_excess_records_a_block() {
        let (limiter, clock) = limiter();
        let id = ip("10.0.0.1");
        let config = LimitType::Reset.config();

        let mut last = None;
        for _ in 0..(config.max_requests * 2) {
            last = Some(limiter.rate_limit(&id, LimitType::Reset).await);
        }
        let last = last.unwrap();
        assert!(last.blocked);
        assert_eq!(last.reset, clock.now_ms() + config.block_ms);

        // Still blocked in the next window.
        clock.advance(config.window_ms);
        assert!(limiter.rate_limit(&id, LimitType::Reset).await.blocked);

        clock.advance(config.block_ms);
        assert!(!limiter.rate_limit(&id, LimitType::Reset).await.blocked);
    }

    #[tokio::test]
    async fn active_block_short_circuits_counting() {
        let (limiter, _clock) = limiter();
        let id = ip("10.0.0.1");
        limiter
            .block_identity(&id, LimitType::Sign, 60_000, "manual")
            .await
            .unwrap();

        let result = limiter.check(&id, LimitType::Sign).await.unwrap();
        assert!(result.blocked);
        assert_eq!(result.remaining, 0);
    }

    #[tokio::test]
    async fn store_failure_fails_open_by_default() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let id = ip("10.0.0.1");

        for _ in 0..20 {
            let result = limiter.rate_limit(&id, LimitType::Auth).await;
            assert!(!result.blocked);
            assert_eq!(result.remaining, result.limit);
        }
        assert!(limiter.check(&id, LimitType::Auth).await.is_err());
    }

    #[tokio::test]
    async fn fail_closed_policy_denies_on_store_failure() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore))
            .with_failure_policy(LimitType::Sign, FailurePolicy::FailClosed);
        let id = ip("10.0.0.1");

        assert!(limiter.rate_limit(&id, LimitType::Sign).await.blocked);
        assert!(!limiter.rate_limit(&id, LimitType::Wallet).await.blocked);
    }

    #[tokio::test]
    async fn anonymous_requests_are_not_counted() {
        let (limiter, _clock) = limiter();
        let anonymous = RequestIdentity::default().with_ip("  ");
        for _ in 0..10 {
            assert!(!limiter.rate_limit(&anonymous, LimitType::Auth).await.blocked);
        }
    }

    #[test]
    fn retry_after_rounds_up() {
        let result = RateLimitResult {
            blocked: true,
            limit: 5,
            remaining: 0,
            reset: 10_500,
        };
        assert_eq!(result.retry_after_secs(9_000), 2);
        assert_eq!(result.retry_after_secs(20_000), 1);
        assert_eq!(max_count(&[3, 9, 1]), 9);
        assert_eq!(max_count(&[]), 0);
    }
}
