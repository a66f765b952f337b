// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session password cache.
//!
//! Holds one user-entered password for a bounded time so that signing
//! requests within a session do not need to re-prompt. The password is kept
//! sealed with AES-256-GCM under a process-local key and is wiped when the
//! expiry timer fires or when it is cleared explicitly.
//!
//! ## Lockout
//!
//! Every failed unseal (or a cached password that fails to unlock the stored
//! key, see [`SessionPassword::record_failed_attempt`]) increments a counter.
//! Each time the counter reaches a multiple of [`MAX_ATTEMPTS`] the session is
//! locked for `min(2^(failed - MAX_ATTEMPTS) minutes, 60 minutes)`. While
//! locked, [`SessionPassword::get_password`] fails immediately without
//! touching the sealed value or the counter. A successful read resets the
//! counter.
//!
//! All deadlines use `tokio::time::Instant`, so tests can drive expiry and
//! lockout with a paused clock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use utoipa::ToSchema;
use zeroize::Zeroizing;

use crate::crypto::encryption::{open, seal, KEY_LEN};
use crate::crypto::CryptoError;

/// Consecutive failures before a lockout episode.
pub const MAX_ATTEMPTS: u32 = 3;

/// Upper bound of a single lockout episode.
pub const MAX_LOCKOUT: Duration = Duration::from_secs(60 * 60);

/// Default cache lifetime.
pub const DEFAULT_EXPIRY_MINUTES: u64 = 30;

/// Symbols accepted by the special-character rule.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

// =============================================================================
// Password Policy
// =============================================================================

/// A single strength rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PasswordRule {
    MinLength,
    Uppercase,
    Lowercase,
    Digit,
    Special,
}

impl PasswordRule {
    pub fn description(&self) -> &'static str {
        match self {
            PasswordRule::MinLength => "at least 12 characters",
            PasswordRule::Uppercase => "an uppercase letter",
            PasswordRule::Lowercase => "a lowercase letter",
            PasswordRule::Digit => "a digit",
            PasswordRule::Special => "a special character",
        }
    }
}

impl std::fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 12 }
    }
}

impl PasswordPolicy {
    /// Check every rule; `Err` lists all the rules that failed.
    pub fn validate(&self, password: &str) -> Result<(), Vec<PasswordRule>> {
        let mut failed = Vec::new();

        if password.chars().count() < self.min_length {
            failed.push(PasswordRule::MinLength);
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            failed.push(PasswordRule::Uppercase);
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            failed.push(PasswordRule::Lowercase);
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            failed.push(PasswordRule::Digit);
        }
        if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
            failed.push(PasswordRule::Special);
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(failed)
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("password is too weak: requires {}", join_rules(.failed))]
    WeakPassword { failed: Vec<PasswordRule> },

    #[error("too many failed attempts, locked out for {remaining_secs} more seconds")]
    LockedOut { remaining_secs: u64 },

    #[error("cached password could not be decrypted: {0}")]
    Decryption(#[source] CryptoError),

    #[error("unable to seal password: {0}")]
    Seal(#[source] CryptoError),

    #[error("expiry must be at least one minute")]
    InvalidExpiry,
}

fn join_rules(rules: &[PasswordRule]) -> String {
    rules
        .iter()
        .map(PasswordRule::description)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// SessionPassword
// =============================================================================

#[derive(Default)]
struct State {
    sealed: Option<Vec<u8>>,
    expiry_timer: Option<AbortHandle>,
    expires_at: Option<Instant>,
    failed_attempts: u32,
    lockout_until: Option<Instant>,
    /// Bumped on every set/clear so a stale timer never wipes a newer value.
    generation: u64,
}

impl State {
    fn clear(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
        self.sealed = None;
        self.expires_at = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Remaining lockout, dropping the deadline once it has passed.
    fn lockout_remaining(&mut self, now: Instant) -> Option<Duration> {
        let until = self.lockout_until?;
        if until > now {
            Some(until - now)
        } else {
            self.lockout_until = None;
            None
        }
    }

    fn expire_if_due(&mut self, now: Instant) {
        if matches!(self.expires_at, Some(at) if at <= now) {
            self.clear();
        }
    }

    /// Count one failure; returns the lockout duration if this one triggers it.
    fn register_failure(&mut self, now: Instant) -> Option<Duration> {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts % MAX_ATTEMPTS != 0 {
            return None;
        }

        let duration = lockout_duration(self.failed_attempts);
        self.lockout_until = Some(now + duration);
        Some(duration)
    }
}

/// `min(2^(failed - MAX_ATTEMPTS) minutes, MAX_LOCKOUT)`.
pub fn lockout_duration(failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(MAX_ATTEMPTS);
    let minutes = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    Duration::from_secs(minutes.saturating_mul(60)).min(MAX_LOCKOUT)
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Point-in-time view of a session, safe to return to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStatus {
    /// Whether a password is currently cached.
    pub has_password: bool,
    /// Seconds until the cached password expires.
    pub expires_in_secs: Option<u64>,
    /// Consecutive failed attempts.
    pub failed_attempts: u32,
    /// Seconds of lockout remaining, if locked.
    pub locked_out_for_secs: Option<u64>,
}

/// Password cache for a single session.
pub struct SessionPassword {
    seal_key: Zeroizing<[u8; KEY_LEN]>,
    policy: PasswordPolicy,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for SessionPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPassword").finish_non_exhaustive()
    }
}

impl SessionPassword {
    pub fn new(seal_key: [u8; KEY_LEN]) -> Self {
        Self::with_policy(seal_key, PasswordPolicy::default())
    }

    pub fn with_policy(seal_key: [u8; KEY_LEN], policy: PasswordPolicy) -> Self {
        Self {
            seal_key: Zeroizing::new(seal_key),
            policy,
            state: Default::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panic in another holder.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate, seal and cache `password` for `expiry_minutes`.
    ///
    /// A weak password is rejected without touching the current state.
    /// Replacing a cached password cancels its timer.
    pub fn set_password(&self, password: &str, expiry_minutes: u64) -> Result<(), SessionError> {
        if expiry_minutes == 0 {
            return Err(SessionError::InvalidExpiry);
        }
        self.policy
            .validate(password)
            .map_err(|failed| SessionError::WeakPassword { failed })?;

        let sealed = seal(&self.seal_key, password.as_bytes()).map_err(SessionError::Seal)?;
        let expiry = Duration::from_secs(expiry_minutes.saturating_mul(60));

        let mut state = self.state();
        state.clear();
        state.sealed = Some(sealed);
        state.expires_at = Some(Instant::now() + expiry);
        state.expiry_timer = self.arm_timer(expiry, state.generation);

        tracing::debug!(expiry_minutes, "Session password cached");
        Ok(())
    }

    /// Spawn the expiry timer when running inside a Tokio runtime.
    ///
    /// Outside a runtime the `expires_at` deadline alone enforces expiry.
    fn arm_timer(&self, expiry: Duration, generation: u64) -> Option<AbortHandle> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.state);

        let task = handle.spawn(async move {
            tokio::time::sleep(expiry).await;
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if state.generation == generation {
                    state.clear();
                    tracing::debug!("Session password expired");
                }
            }
        });
        Some(task.abort_handle())
    }

    /// Unseal the cached password, resetting the failure count on success.
    ///
    /// `Ok(None)` when nothing is cached (or it expired).
    pub fn get_password(&self) -> Result<Option<String>, SessionError> {
        self.unseal(true)
    }

    /// Unseal the cached password without resetting the failure count.
    ///
    /// For callers that still have to prove the password works; they report
    /// back with [`record_success`](Self::record_success) or
    /// [`record_failed_attempt`](Self::record_failed_attempt).
    pub fn peek_password(&self) -> Result<Option<String>, SessionError> {
        self.unseal(false)
    }

    fn unseal(&self, reset_on_success: bool) -> Result<Option<String>, SessionError> {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(remaining) = state.lockout_remaining(now) {
            return Err(SessionError::LockedOut {
                remaining_secs: ceil_secs(remaining),
            });
        }

        state.expire_if_due(now);
        let Some(sealed) = state.sealed.as_deref() else {
            return Ok(None);
        };

        match open(&self.seal_key, sealed) {
            Ok(plaintext) => {
                let password = String::from_utf8(plaintext.to_vec())
                    .map_err(|_| SessionError::Decryption(CryptoError::Decryption))?;
                if reset_on_success {
                    state.failed_attempts = 0;
                }
                Ok(Some(password))
            }
            Err(e) => match state.register_failure(now) {
                Some(lockout) => {
                    tracing::warn!(
                        failed_attempts = state.failed_attempts,
                        lockout_secs = lockout.as_secs(),
                        "Session locked out"
                    );
                    Err(SessionError::LockedOut {
                        remaining_secs: ceil_secs(lockout),
                    })
                }
                None => Err(SessionError::Decryption(e)),
            },
        }
    }

    /// Count a failure that happened outside this cache, e.g. the cached
    /// password did not unlock the stored key.
    ///
    /// Returns `Err(LockedOut)` when this failure starts a lockout episode.
    pub fn record_failed_attempt(&self) -> Result<(), SessionError> {
        let now = Instant::now();
        let mut state = self.state();
        match state.register_failure(now) {
            Some(lockout) => {
                tracing::warn!(
                    failed_attempts = state.failed_attempts,
                    lockout_secs = lockout.as_secs(),
                    "Session locked out"
                );
                Err(SessionError::LockedOut {
                    remaining_secs: ceil_secs(lockout),
                })
            }
            None => Ok(()),
        }
    }

    /// Reset the failure count after a password was verified elsewhere.
    pub fn record_success(&self) {
        self.state().failed_attempts = 0;
    }

    /// Discard the cached password. Idempotent.
    ///
    /// The failure count and any lockout are kept.
    pub fn clear_password(&self) {
        self.state().clear();
    }

    pub fn status(&self) -> SessionStatus {
        let now = Instant::now();
        let mut state = self.state();
        state.expire_if_due(now);
        let locked = state.lockout_remaining(now);

        SessionStatus {
            has_password: state.sealed.is_some(),
            expires_in_secs: state.expires_at.map(|at| ceil_secs(at.saturating_duration_since(now))),
            failed_attempts: state.failed_attempts,
            locked_out_for_secs: locked.map(ceil_secs),
        }
    }

    /// Nothing cached and not locked out.
    pub fn is_idle(&self) -> bool {
        let status = self.status();
        !status.has_password && status.locked_out_for_secs.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "StrongP@ssw0rd123!";

    fn session() -> SessionPassword {
        SessionPassword::new([7u8; KEY_LEN])
    }

    /// Corrupt the sealed value so the next unseal fails.
    fn corrupt(session: &SessionPassword) {
        let mut state = session.state();
        if let Some(sealed) = state.sealed.as_mut() {
            let last = sealed.len() - 1;
            sealed[last] ^= 0xff;
        }
    }

    #[test]
    fn rejects_weak_passwords() {
        let policy = PasswordPolicy::default();
        for weak in [
            "short",
            "nouppercaseor123!",
            "NOLOWERCASEOR123!",
            "NoSpecialChars123",
            "NoNumbers!",
        ] {
            assert!(policy.validate(weak).is_err(), "{weak} should be rejected");
        }
        assert!(policy.validate(STRONG).is_ok());
    }

    #[test]
    fn weak_password_lists_every_failed_rule() {
        let failed = PasswordPolicy::default().validate("NoNumbers!").unwrap_err();
        assert_eq!(failed, vec![PasswordRule::MinLength, PasswordRule::Digit]);
    }

    #[tokio::test]
    async fn weak_password_leaves_state_untouched() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();

        let err = session.set_password("short", 30).unwrap_err();
        assert!(matches!(err, SessionError::WeakPassword { .. }));
        assert_eq!(session.get_password().unwrap().as_deref(), Some(STRONG));
    }

    #[tokio::test]
    async fn empty_session_returns_none() {
        let session = session();
        assert!(session.get_password().unwrap().is_none());
        assert!(session.is_idle());
    }

    #[test]
    fn zero_expiry_is_rejected() {
        let session = session();
        assert!(matches!(
            session.set_password(STRONG, 0),
            Err(SessionError::InvalidExpiry)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn password_expires_after_timeout() {
        let session = session();
        session.set_password(STRONG, 1).unwrap();
        assert_eq!(session.get_password().unwrap().as_deref(), Some(STRONG));

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(session.get_password().unwrap().is_none());
        assert!(!session.status().has_password);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_password_cancels_previous_timer() {
        let session = session();
        session.set_password(STRONG, 1).unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        session.set_password("An0ther-StrongPass", 5).unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            session.get_password().unwrap().as_deref(),
            Some("An0ther-StrongPass")
        );
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();
        session.clear_password();
        session.clear_password();
        assert!(session.get_password().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_lock_out() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();
        corrupt(&session);

        assert!(matches!(session.get_password(), Err(SessionError::Decryption(_))));
        assert!(matches!(session.get_password(), Err(SessionError::Decryption(_))));
        match session.get_password() {
            Err(SessionError::LockedOut { remaining_secs }) => assert_eq!(remaining_secs, 60),
            other => panic!("expected lockout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lockout_does_not_consume_attempts() {
        let session = session();
        session.set_password(STRONG, 120).unwrap();
        corrupt(&session);
        for _ in 0..3 {
            let _ = session.get_password();
        }

        for _ in 0..5 {
            assert!(matches!(session.get_password(), Err(SessionError::LockedOut { .. })));
        }
        assert_eq!(session.status().failed_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_lockout_is_strictly_longer() {
        let session = session();
        session.set_password(STRONG, 120).unwrap();
        corrupt(&session);

        let mut first = 0;
        for _ in 0..3 {
            if let Err(SessionError::LockedOut { remaining_secs }) = session.get_password() {
                first = remaining_secs;
            }
        }
        assert!(first > 0);

        tokio::time::advance(Duration::from_secs(first + 1)).await;

        let mut second = 0;
        for _ in 0..3 {
            if let Err(SessionError::LockedOut { remaining_secs }) = session.get_password() {
                second = remaining_secs;
            }
        }
        assert!(second > first, "second lockout {second}s not longer than {first}s");
    }

    #[tokio::test]
    async fn success_resets_failure_counter() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();

        session.record_failed_attempt().unwrap();
        session.record_failed_attempt().unwrap();
        assert_eq!(session.status().failed_attempts, 2);

        assert_eq!(session.get_password().unwrap().as_deref(), Some(STRONG));
        assert_eq!(session.status().failed_attempts, 0);
    }

    #[tokio::test]
    async fn external_failures_count_toward_lockout() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();

        session.record_failed_attempt().unwrap();
        session.record_failed_attempt().unwrap();
        assert!(matches!(
            session.record_failed_attempt(),
            Err(SessionError::LockedOut { .. })
        ));
        assert!(matches!(session.get_password(), Err(SessionError::LockedOut { .. })));
    }

    #[tokio::test]
    async fn peek_keeps_failure_counter_until_success() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();

        for _ in 0..2 {
            assert_eq!(session.peek_password().unwrap().as_deref(), Some(STRONG));
            session.record_failed_attempt().unwrap();
        }
        assert_eq!(session.peek_password().unwrap().as_deref(), Some(STRONG));
        assert!(matches!(
            session.record_failed_attempt(),
            Err(SessionError::LockedOut { .. })
        ));
        assert!(matches!(session.peek_password(), Err(SessionError::LockedOut { .. })));
    }

    #[tokio::test]
    async fn record_success_resets_counter() {
        let session = session();
        session.record_failed_attempt().unwrap();
        session.record_failed_attempt().unwrap();
        session.record_success();
        assert_eq!(session.status().failed_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_keeps_lockout() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();
        for _ in 0..3 {
            let _ = session.record_failed_attempt();
        }

        session.clear_password();
        let status = session.status();
        assert!(!status.has_password);
        assert_eq!(status.failed_attempts, 3);
        assert!(status.locked_out_for_secs.is_some());
        assert!(!session.is_idle());
    }

    #[test]
    fn lockout_duration_is_capped() {
        assert_eq!(lockout_duration(3), Duration::from_secs(60));
        assert_eq!(lockout_duration(6), Duration::from_secs(8 * 60));
        assert_eq!(lockout_duration(9), MAX_LOCKOUT);
        assert_eq!(lockout_duration(300), MAX_LOCKOUT);
    }

    #[test]
    fn works_without_runtime() {
        let session = session();
        session.set_password(STRONG, 30).unwrap();
        assert_eq!(session.get_password().unwrap().as_deref(), Some(STRONG));
    }
}
