// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::crypto::CryptoError;
use crate::session::SessionError;
use crate::signing::SigningError;
use crate::storage::KeyStorageError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Extra fields merged into the JSON body.
    pub details: Option<Map<String, Value>>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(flatten)]
    details: Option<Map<String, Value>>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Attach extra body fields; non-object values are ignored.
    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details = Some(map);
        }
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn locked(remaining_secs: u64) -> Self {
        Self::new(StatusCode::LOCKED, "Too many failed attempts")
            .with_details(json!({ "retry_after_secs": remaining_secs }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

impl From<KeyStorageError> for ApiError {
    fn from(e: KeyStorageError) -> Self {
        match &e {
            KeyStorageError::Decryption(_) => {
                ApiError::unauthorized("Wrong password").with_details(json!({ "retryable": true }))
            }
            KeyStorageError::NotFound(_) => ApiError::not_found("No stored key"),
            KeyStorageError::StoreUnavailable { kind, source } => {
                tracing::error!(store = %kind, error = %source, "Key store unavailable");
                ApiError::service_unavailable("Key storage temporarily unavailable")
            }
            KeyStorageError::Migration { .. }
            | KeyStorageError::UnsupportedVersion { .. }
            | KeyStorageError::Encryption(_) => {
                tracing::error!(error = %e, "Key storage failure");
                ApiError::internal("Key storage failure")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::WeakPassword { failed } => {
                let requirements: Vec<&str> = failed.iter().map(|r| r.description()).collect();
                ApiError::bad_request("Password does not meet requirements")
                    .with_details(json!({ "failed_rules": failed, "requirements": requirements }))
            }
            SessionError::LockedOut { remaining_secs } => ApiError::locked(remaining_secs),
            SessionError::Decryption(_) => ApiError::unauthorized("Cached password is invalid"),
            SessionError::InvalidExpiry => {
                ApiError::bad_request("expiry_minutes must be at least 1")
            }
            SessionError::Seal(e) => {
                tracing::error!(error = %e, "Unable to seal session password");
                ApiError::internal("Unable to cache password")
            }
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(e: SigningError) -> Self {
        match e {
            SigningError::EmptyTransaction => ApiError::bad_request("Transaction is empty"),
            // The stored secret is not a usable key.
            SigningError::InvalidPrivateKey(reason) => {
                tracing::error!(reason = %reason, "Stored key is not a valid signing key");
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "Stored key cannot sign")
            }
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Decryption => ApiError::unauthorized("Wrong password"),
            other => {
                tracing::error!(error = %other, "Crypto failure");
                ApiError::internal("Encryption failure")
            }
        }
    }
}
