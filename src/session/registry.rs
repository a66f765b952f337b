// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-session password caches and their background reaper.
//!
//! Each authenticated session gets its own [`SessionPassword`], sealed under
//! a sub-key derived from the local key material and the session key, so a
//! sealed value from one session is useless in another.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::password::{SessionPassword, DEFAULT_EXPIRY_MINUTES};
use crate::crypto::KeyMaterial;

/// Default interval between reaper sweeps.
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Sub-key label prefix for session seals.
const SEAL_LABEL: &str = "session-password";

pub struct SessionRegistry {
    key_material: KeyMaterial,
    default_expiry_minutes: u64,
    sessions: RwLock<HashMap<String, Arc<SessionPassword>>>,
}

impl SessionRegistry {
    pub fn new(key_material: KeyMaterial) -> Self {
        Self::with_default_expiry(key_material, DEFAULT_EXPIRY_MINUTES)
    }

    pub fn with_default_expiry(key_material: KeyMaterial, default_expiry_minutes: u64) -> Self {
        Self {
            key_material,
            default_expiry_minutes,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn default_expiry_minutes(&self) -> u64 {
        self.default_expiry_minutes
    }

    /// Existing cache for the session, if any.
    pub fn get(&self, session_key: &str) -> Option<Arc<SessionPassword>> {
        let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());
        sessions.get(session_key).cloned()
    }

    /// Cache for the session, created on first use.
    pub fn get_or_create(&self, session_key: &str) -> Arc<SessionPassword> {
        if let Some(existing) = self.get(session_key) {
            return existing;
        }

        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        sessions
            .entry(session_key.to_string())
            .or_insert_with(|| {
                let seal_key = self
                    .key_material
                    .derive_subkey(&format!("{SEAL_LABEL}:{session_key}"));
                Arc::new(SessionPassword::new(seal_key))
            })
            .clone()
    }

    /// Wipe a session's cached password, keeping its failure count and
    /// lockout. Returns whether the session existed.
    pub fn clear_password(&self, session_key: &str) -> bool {
        match self.get(session_key) {
            Some(session) => {
                session.clear_password();
                true
            }
            None => false,
        }
    }

    /// Drop a session's cache, wiping its password.
    pub fn remove(&self, session_key: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
            sessions.remove(session_key)
        };
        match removed {
            Some(session) => {
                session.clear_password();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions with no cached password and no active lockout.
    ///
    /// Locked sessions are kept so that dropping and recreating a session
    /// cannot be used to skip a lockout.
    pub fn reap_idle(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_idle());
        before - sessions.len()
    }
}

// =============================================================================
// SessionReaper
// =============================================================================

/// Background task that periodically drops idle sessions.
pub struct SessionReaper {
    registry: Arc<SessionRegistry>,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            interval: DEFAULT_REAP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reaper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Session reaper starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Session reaper shutting down");
                    return;
                }
            }

            let reaped = self.registry.reap_idle();
            if reaped > 0 {
                debug!(reaped, remaining = self.registry.len(), "Reaped idle sessions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "StrongP@ssw0rd123!";

    fn registry() -> SessionRegistry {
        SessionRegistry::new(KeyMaterial::ephemeral().unwrap())
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let registry = registry();
        let a = registry.get_or_create("session-a");
        let b = registry.get_or_create("session-b");

        a.set_password(STRONG, 30).unwrap();
        assert_eq!(a.get_password().unwrap().as_deref(), Some(STRONG));
        assert!(b.get_password().unwrap().is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let registry = registry();
        let first = registry.get_or_create("session-a");
        let second = registry.get_or_create("session-a");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn remove_wipes_password() {
        let registry = registry();
        let session = registry.get_or_create("session-a");
        session.set_password(STRONG, 30).unwrap();

        assert!(registry.remove("session-a"));
        assert!(!registry.remove("session-a"));
        assert!(session.get_password().unwrap().is_none());
        assert!(registry.get("session-a").is_none());
    }

    #[tokio::test]
    async fn clear_password_keeps_lockout() {
        let registry = registry();
        let session = registry.get_or_create("session-a");
        session.set_password(STRONG, 30).unwrap();
        for _ in 0..3 {
            let _ = session.record_failed_attempt();
        }

        assert!(registry.clear_password("session-a"));
        assert!(!registry.clear_password("session-b"));

        let again = registry.get_or_create("session-a");
        assert!(Arc::ptr_eq(&session, &again));
        assert!(again.status().locked_out_for_secs.is_some());
        assert!(!again.status().has_password);
    }

    #[tokio::test]
    async fn reap_keeps_active_and_locked_sessions() {
        let registry = registry();
        registry.get_or_create("idle");
        registry.get_or_create("active").set_password(STRONG, 30).unwrap();
        let locked = registry.get_or_create("locked");
        for _ in 0..3 {
            let _ = locked.record_failed_attempt();
        }

        assert_eq!(registry.reap_idle(), 1);
        assert!(registry.get("idle").is_none());
        assert!(registry.get("active").is_some());
        assert!(registry.get("locked").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_runs_until_cancelled() {
        let registry = Arc::new(registry());
        registry.get_or_create("idle");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            SessionReaper::new(registry.clone())
                .with_interval(Duration::from_secs(5))
                .run(shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }
}
