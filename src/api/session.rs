// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session password and key password reset endpoints.
//!
//! The session password is cached per auth session (see
//! [`AuthenticatedUser::session_key`](crate::auth::AuthenticatedUser::session_key)),
//! so two browser sessions of the same user never share a cache.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use super::run_blocking;
use crate::{
    auth::Auth,
    error::ApiError,
    monitoring::{SecurityEvent, SecurityEventType},
    session::{PasswordPolicy, SessionError, SessionStatus},
    state::AppState,
    storage::StoreOutcome,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetSessionPasswordRequest {
    pub password: String,
    /// Cache lifetime; server default when omitted.
    #[serde(default)]
    pub expiry_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResetPasswordResponse {
    pub outcome: StoreOutcome,
    pub message: String,
}

/// Cache the wallet password for the current session.
#[utoipa::path(
    post,
    path = "/api/auth/session-password",
    tag = "Session",
    security(("bearer_auth" = [])),
    request_body = SetSessionPasswordRequest,
    responses(
        (status = 200, description = "Password cached", body = SessionStatus),
        (status = 400, description = "Password does not meet requirements"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn set_session_password(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<SetSessionPasswordRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let expiry = request
        .expiry_minutes
        .unwrap_or_else(|| state.sessions.default_expiry_minutes());

    let session = state.sessions.get_or_create(&user.session_key());
    session.set_password(&request.password, expiry)?;

    state.monitor.record(
        SecurityEvent::new(SecurityEventType::SessionPasswordSet)
            .with_user(user.user_id.clone())
            .with_details(json!({ "expiry_minutes": expiry })),
    );
    Ok(Json(session.status()))
}

/// Session cache status. Never returns the password.
#[utoipa::path(
    get,
    path = "/api/auth/session-password",
    tag = "Session",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session status", body = SessionStatus),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn session_password_status(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Json<SessionStatus> {
    let status = match state.sessions.get(&user.session_key()) {
        Some(session) => session.status(),
        None => SessionStatus {
            has_password: false,
            expires_in_secs: None,
            failed_attempts: 0,
            locked_out_for_secs: None,
        },
    };
    Json(status)
}

/// Forget the cached password.
#[utoipa::path(
    delete,
    path = "/api/auth/session-password",
    tag = "Session",
    security(("bearer_auth" = [])),
    responses(
        (status = 204, description = "Password cleared"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn clear_session_password(Auth(user): Auth, State(state): State<AppState>) -> StatusCode {
    if state.sessions.clear_password(&user.session_key()) {
        state.monitor.record(
            SecurityEvent::new(SecurityEventType::SessionPasswordCleared).with_user(user.user_id),
        );
    }
    StatusCode::NO_CONTENT
}

/// Re-encrypt the stored key under a new password.
///
/// The cached session password is cleared afterwards.
#[utoipa::path(
    post,
    path = "/api/auth/reset",
    tag = "Session",
    security(("bearer_auth" = [])),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed in both stores", body = ResetPasswordResponse),
        (status = 202, description = "Password changed in one store only", body = ResetPasswordResponse),
        (status = 400, description = "New password does not meet requirements"),
        (status = 401, description = "Wrong current password"),
        (status = 404, description = "No stored key"),
        (status = 503, description = "Key storage unavailable")
    )
)]
pub async fn reset_password(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<(StatusCode, Json<ResetPasswordResponse>), ApiError> {
    PasswordPolicy::default()
        .validate(&request.new_password)
        .map_err(|failed| SessionError::WeakPassword { failed })?;

    let keys = state.keys.clone();
    let user_id = user.user_id.clone();
    let result = run_blocking(move || {
        keys.change_password(&user_id, &request.current_password, &request.new_password)
    })
    .await?;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if e.is_wrong_password() {
                state.monitor.record(
                    SecurityEvent::new(SecurityEventType::KeyUnlockFailed)
                        .with_user(user.user_id.clone())
                        .with_details(json!({ "operation": "reset" })),
                );
            }
            return Err(e.into());
        }
    };

    if !outcome.is_persisted() {
        return Err(ApiError::service_unavailable("Key storage temporarily unavailable"));
    }

    state.sessions.clear_password(&user.session_key());
    state.monitor.record(
        SecurityEvent::new(SecurityEventType::KeyPasswordChanged)
            .with_user(user.user_id)
            .with_details(json!({ "outcome": outcome })),
    );

    let (status, message) = if outcome.is_success() {
        (StatusCode::OK, "Password changed")
    } else {
        (StatusCode::ACCEPTED, "Password changed in one store only; resync the backup")
    };
    Ok((
        status,
        Json(ResetPasswordResponse {
            outcome,
            message: message.to_string(),
        }),
    ))
}
