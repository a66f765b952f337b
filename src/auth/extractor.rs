// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users, and request identity for the
//! rate limiter.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap,
    },
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::claims::SessionClaims;
use super::{AuthError, AuthenticatedUser};
use crate::rate_limit::RequestIdentity;
use crate::state::{AppState, AuthConfig};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Cookie carrying the browser session id.
pub const SESSION_COOKIE: &str = "lynx_session";

/// Extractor for authenticated users.
///
/// ## Authentication Modes
///
/// - **Production mode** (`SUPABASE_JWT_SECRET` set): HS256 signature, expiry
///   and optional issuer are verified
/// - **Development mode** (no secret): structure and expiry only, no
///   signature check
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let token = bearer_token(&parts.headers)?;
        let user = verify_token(token, &state.auth_config)?;
        Ok(Auth(user))
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)
}

/// Verify a session token and extract the user.
pub fn verify_token(token: &str, config: &AuthConfig) -> Result<AuthenticatedUser, AuthError> {
    let claims = match &config.jwt_secret {
        Some(secret) => verify_production(token, secret, config)?,
        None => verify_development(token, config)?,
    };
    AuthenticatedUser::from_claims(claims).ok_or(AuthError::MissingSubject)
}

fn verify_production(
    token: &str,
    secret: &str,
    config: &AuthConfig,
) -> Result<SessionClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    // Supabase sets `aud: authenticated`; the subject is what matters here.
    validation.validate_aud = false;
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<SessionClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            _ => AuthError::MalformedToken,
        })
}

/// WARNING: development environments only.
fn verify_development(token: &str, config: &AuthConfig) -> Result<SessionClaims, AuthError> {
    let claims = jsonwebtoken::dangerous::insecure_decode::<SessionClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?
        .claims;

    let now = chrono::Utc::now().timestamp();
    if claims.exp > 0 && claims.exp < now - CLOCK_SKEW_LEEWAY as i64 {
        return Err(AuthError::TokenExpired);
    }
    if let Some(ref issuer) = config.issuer {
        if &claims.iss != issuer {
            return Err(AuthError::InvalidIssuer);
        }
    }
    Ok(claims)
}

// =============================================================================
// Request identity
// =============================================================================

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
pub fn client_ip(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = parts
        .headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Every identity signal present on the request.
///
/// The user signal is only taken from a token that verifies; an invalid token
/// is ignored here and rejected later by [`Auth`].
pub fn identity_from_parts(parts: &Parts, config: &AuthConfig) -> RequestIdentity {
    let user = bearer_token(&parts.headers)
        .ok()
        .and_then(|token| verify_token(token, config).ok());

    let session = session_cookie(&parts.headers)
        .or_else(|| user.as_ref().and_then(|u| u.session_id.clone()));

    RequestIdentity {
        ip: client_ip(parts),
        session,
        user: user.map(|u| u.user_id),
    }
}
