// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::AppConfig;
use crate::crypto::{KeyMaterial, KeyMaterialError};
use crate::monitoring::{SecurityLog, SecurityMonitor};
use crate::rate_limit::{FailurePolicy, InMemoryCounterStore, RateLimiter};
use crate::session::SessionRegistry;
use crate::signing::{Secp256k1Signer, TransactionSigner};
use crate::storage::{KeyStorageError, KeyStorageManager, KeyVersioning, StoragePaths};

/// Session token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret; `None` runs in development mode.
    pub jwt_secret: Option<String>,
    /// Expected `iss` claim.
    pub issuer: Option<String>,
}

impl AuthConfig {
    pub fn is_development(&self) -> bool {
        self.jwt_secret.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("key store version {0} has no KDF parameters")]
    UnknownKeyVersion(u32),

    #[error(transparent)]
    KeyStorage(#[from] KeyStorageError),

    #[error(transparent)]
    KeyMaterial(#[from] KeyMaterialError),
}

#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<KeyStorageManager>,
    pub sessions: Arc<SessionRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub monitor: Arc<dyn SecurityMonitor>,
    pub signer: Arc<dyn TransactionSigner>,
    pub auth_config: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(
        keys: Arc<KeyStorageManager>,
        sessions: Arc<SessionRegistry>,
        rate_limiter: Arc<RateLimiter>,
        monitor: Arc<dyn SecurityMonitor>,
    ) -> Self {
        Self {
            keys,
            sessions,
            rate_limiter,
            monitor,
            signer: Arc::new(Secp256k1Signer),
            auth_config: Arc::new(AuthConfig::default()),
        }
    }

    /// Open the stores under `DATA_DIR` and wire every component from
    /// configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let paths = StoragePaths::new(&config.data_dir);

        let versioning = KeyVersioning::default().with_current(config.key_store_version);
        if versioning.current_params().is_none() {
            return Err(StartupError::UnknownKeyVersion(config.key_store_version));
        }
        let keys = KeyStorageManager::open(&paths, versioning)?;

        let key_material = KeyMaterial::load_or_create(&paths.key_material())?;
        let sessions =
            SessionRegistry::with_default_expiry(key_material, config.session_expiry_minutes);

        let rate_limiter = config.fail_closed.iter().fold(
            RateLimiter::new(Arc::new(InMemoryCounterStore::default())),
            |limiter, limit| limiter.with_failure_policy(*limit, FailurePolicy::FailClosed),
        );

        let auth_config = AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
        };

        Ok(Self::new(
            Arc::new(keys),
            Arc::new(sessions),
            Arc::new(rate_limiter),
            Arc::new(SecurityLog::new(paths)),
        )
        .with_auth_config(auth_config))
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = Arc::new(auth_config);
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn SecurityMonitor>) -> Self {
        self.monitor = monitor;
        self
    }
}

/// State over temporary stores with cheap KDF parameters and development
/// mode auth.
#[cfg(test)]
pub(crate) fn test_state() -> (AppState, tempfile::TempDir) {
    use crate::crypto::KdfParams;
    use crate::monitoring::TracingMonitor;

    let dir = tempfile::TempDir::new().unwrap();
    let paths = StoragePaths::new(dir.path());
    let versioning = KeyVersioning::new(2)
        .with_params(1, KdfParams::from_iterations(500).unwrap())
        .with_params(2, KdfParams::from_iterations(1_000).unwrap());
    let keys = KeyStorageManager::open(&paths, versioning).unwrap();
    let sessions = SessionRegistry::new(KeyMaterial::ephemeral().unwrap());
    let limiter = RateLimiter::new(Arc::new(InMemoryCounterStore::default()));

    let state = AppState::new(
        Arc::new(keys),
        Arc::new(sessions),
        Arc::new(limiter),
        Arc::new(TracingMonitor),
    );
    (state, dir)
}
