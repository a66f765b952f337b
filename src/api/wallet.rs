// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet key endpoints.
//!
//! Private keys arrive already generated by the client, are encrypted under
//! the user's wallet password and written to both key stores. They are only
//! ever decrypted in memory to sign a transaction and are never returned.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use zeroize::Zeroizing;

use super::run_blocking;
use crate::{
    auth::{Auth, AuthenticatedUser},
    error::ApiError,
    monitoring::{SecurityEvent, SecurityEventType},
    session::{PasswordPolicy, SessionError},
    signing::{parse_secret_key, SignedTransaction},
    state::AppState,
    storage::{KeyStorageError, StoreKind, StoreOutcome, StoredKeyInfo},
};

#[derive(Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Private key (hex, Hedera DER hex or PEM).
    pub private_key: String,
    /// Wallet password the key is encrypted under.
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateWalletResponse {
    pub outcome: StoreOutcome,
    pub message: String,
}

/// Stored key metadata from each store.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KeyInfoResponse {
    pub primary: Option<StoredKeyInfo>,
    pub backup: Option<StoredKeyInfo>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackupResponse {
    /// Whether a record was copied.
    pub copied: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct SignRequest {
    /// Transaction bytes (hex, optional `0x`).
    pub transaction: String,
    /// Wallet password; the cached session password is used when omitted.
    #[serde(default)]
    pub password: Option<String>,
}

/// Encrypt and store the user's private key.
#[utoipa::path(
    post,
    path = "/api/wallet/create",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Key stored in both stores", body = CreateWalletResponse),
        (status = 202, description = "Key stored in one store only", body = CreateWalletResponse),
        (status = 400, description = "Invalid key or weak password"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "A key is already stored"),
        (status = 503, description = "Key storage unavailable")
    )
)]
pub async fn create_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<CreateWalletResponse>), ApiError> {
    let secret = Zeroizing::new(request.private_key);
    let password = Zeroizing::new(request.password);

    PasswordPolicy::default()
        .validate(&password)
        .map_err(|failed| SessionError::WeakPassword { failed })?;
    parse_secret_key(&secret).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let keys = state.keys.clone();
    let user_id = user.user_id.clone();
    let outcome = run_blocking(move || {
        if keys.has_stored_key(&user_id) {
            return Ok(None);
        }
        keys.store_private_key(&user_id, &secret, &password).map(Some)
    })
    .await??;

    let Some(outcome) = outcome else {
        return Err(ApiError::conflict("A key is already stored for this user"));
    };

    let (status, event, message) = match outcome {
        StoreOutcome::BothOk => (
            StatusCode::CREATED,
            SecurityEventType::KeyStored,
            "Key stored",
        ),
        StoreOutcome::PrimaryOnlyOk | StoreOutcome::BackupOnlyOk => (
            StatusCode::ACCEPTED,
            SecurityEventType::KeyStorePartial,
            "Key stored in one store only; resync the backup",
        ),
        StoreOutcome::BothFailed => {
            return Err(ApiError::service_unavailable("Key storage temporarily unavailable"));
        }
    };

    state.monitor.record(
        SecurityEvent::new(event)
            .with_user(user.user_id)
            .with_details(json!({ "outcome": outcome })),
    );
    Ok((
        status,
        Json(CreateWalletResponse {
            outcome,
            message: message.to_string(),
        }),
    ))
}

/// Metadata of the user's stored key in each store.
#[utoipa::path(
    get,
    path = "/api/wallet/key",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Key metadata", body = KeyInfoResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No stored key")
    )
)]
pub async fn get_key_info(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<KeyInfoResponse>, ApiError> {
    let keys = state.keys.clone();
    let user_id = user.user_id;
    let response = run_blocking(move || {
        let lookup = |kind: StoreKind| match keys.get_stored_key(&user_id, kind) {
            Ok(record) => record.map(|r| StoredKeyInfo::from_record(kind, &r)),
            Err(e) => {
                tracing::warn!(store = %kind, error = %e, "Key store lookup failed");
                None
            }
        };
        KeyInfoResponse {
            primary: lookup(StoreKind::Primary),
            backup: lookup(StoreKind::Backup),
        }
    })
    .await?;

    if response.primary.is_none() && response.backup.is_none() {
        return Err(ApiError::not_found("No stored key"));
    }
    Ok(Json(response))
}

/// Restore the PRIMARY record from BACKUP.
#[utoipa::path(
    post,
    path = "/api/wallet/backup/recover",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Recovery attempted", body = BackupResponse),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Key storage unavailable")
    )
)]
pub async fn recover_from_backup(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<BackupResponse>, ApiError> {
    let keys = state.keys.clone();
    let user_id = user.user_id.clone();
    let copied = run_blocking(move || keys.attempt_recovery(&user_id)).await??;

    if copied {
        state
            .monitor
            .record(SecurityEvent::new(SecurityEventType::KeyRecovered).with_user(user.user_id));
    }
    Ok(Json(BackupResponse { copied }))
}

/// Mirror the PRIMARY record into BACKUP after a partial write.
#[utoipa::path(
    post,
    path = "/api/wallet/backup/resync",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Resync attempted", body = BackupResponse),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Key storage unavailable")
    )
)]
pub async fn resync_backup(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<BackupResponse>, ApiError> {
    let keys = state.keys.clone();
    let copied = run_blocking(move || keys.resync_backup(&user.user_id)).await??;
    Ok(Json(BackupResponse { copied }))
}

/// Sign a transaction with the stored key.
///
/// Uses the password from the body, else the cached session password. A
/// password that fails to unlock the key counts toward the session lockout.
#[utoipa::path(
    post,
    path = "/api/wallet/sign",
    tag = "Wallet",
    security(("bearer_auth" = [])),
    request_body = SignRequest,
    responses(
        (status = 200, description = "Transaction signed", body = SignedTransaction),
        (status = 400, description = "Invalid transaction"),
        (status = 401, description = "Wrong or missing password"),
        (status = 404, description = "No stored key"),
        (status = 423, description = "Session locked out"),
        (status = 500, description = "Stored key migration failed")
    )
)]
pub async fn sign_transaction(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignedTransaction>, ApiError> {
    let tx_hex = request.transaction.trim();
    let transaction = hex::decode(tx_hex.strip_prefix("0x").unwrap_or(tx_hex))
        .map_err(|_| ApiError::bad_request("transaction must be hex"))?;
    if transaction.is_empty() {
        return Err(ApiError::bad_request("Transaction is empty"));
    }

    let session = state.sessions.get_or_create(&user.session_key());
    if let Some(remaining_secs) = session.status().locked_out_for_secs {
        return Err(ApiError::locked(remaining_secs));
    }

    let password = match request.password {
        Some(password) => Zeroizing::new(password),
        None => match session.peek_password()? {
            Some(password) => Zeroizing::new(password),
            None => {
                return Err(ApiError::unauthorized("Password required")
                    .with_details(json!({ "session_password": false })));
            }
        },
    };

    let keys = state.keys.clone();
    let user_id = user.user_id.clone();
    let retrieved = run_blocking(move || keys.retrieve_private_key(&user_id, &password)).await?;

    let secret = match retrieved {
        Ok(Some(secret)) => {
            session.record_success();
            Zeroizing::new(secret)
        }
        Ok(None) => return Err(ApiError::not_found("No stored key")),
        Err(e) => return Err(unlock_failed(&state, &user, &session, e)),
    };

    let signed = state.signer.sign(&secret, &transaction)?;

    state.monitor.record(
        SecurityEvent::new(SecurityEventType::TransactionSigned)
            .with_user(user.user_id)
            .with_details(json!({ "bytes": transaction.len() })),
    );
    Ok(Json(signed))
}

fn unlock_failed(
    state: &AppState,
    user: &AuthenticatedUser,
    session: &crate::session::SessionPassword,
    error: KeyStorageError,
) -> ApiError {
    match &error {
        KeyStorageError::Decryption(_) => {
            state.monitor.record(
                SecurityEvent::new(SecurityEventType::KeyUnlockFailed)
                    .with_user(user.user_id.clone())
                    .with_details(json!({ "operation": "sign" })),
            );
            if let Err(locked) = session.record_failed_attempt() {
                state.monitor.record(
                    SecurityEvent::new(SecurityEventType::SessionLockedOut)
                        .with_user(user.user_id.clone()),
                );
                return locked.into();
            }
        }
        KeyStorageError::Migration { from, to, .. } => {
            state.monitor.record(
                SecurityEvent::new(SecurityEventType::KeyMigrationFailed)
                    .with_user(user.user_id.clone())
                    .with_details(json!({ "from": from, "to": to })),
            );
        }
        _ => {}
    }
    error.into()
}
