// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims and the authenticated user.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Claims read from a Supabase access token.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionClaims {
    /// Supabase user id.
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Supabase auth session id.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// User identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Stable user id (`sub`).
    pub user_id: String,
    /// Auth session id, when the token carries one.
    pub session_id: Option<String>,
    pub email: Option<String>,
    /// Token expiry (Unix seconds, 0 if absent).
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub(crate) fn from_claims(claims: SessionClaims) -> Option<Self> {
        if claims.sub.trim().is_empty() {
            return None;
        }
        Some(Self {
            user_id: claims.sub,
            session_id: claims.session_id.filter(|s| !s.is_empty()),
            email: claims.email,
            expires_at: claims.exp,
        })
    }

    /// Key of this user's session password cache.
    ///
    /// Falls back to the user id when the token has no session id.
    pub fn session_key(&self) -> String {
        match &self.session_id {
            Some(session_id) => format!("{}:{session_id}", self.user_id),
            None => self.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, session_id: Option<&str>) -> SessionClaims {
        SessionClaims {
            sub: sub.to_string(),
            exp: 0,
            iss: String::new(),
            email: None,
            session_id: session_id.map(str::to_string),
        }
    }

    #[test]
    fn empty_subject_is_rejected() {
        assert!(AuthenticatedUser::from_claims(claims("  ", None)).is_none());
    }

    #[test]
    fn session_key_scopes_by_session() {
        let with_session = AuthenticatedUser::from_claims(claims("user-1", Some("s1"))).unwrap();
        assert_eq!(with_session.session_key(), "user-1:s1");

        let without = AuthenticatedUser::from_claims(claims("user-1", Some(""))).unwrap();
        assert_eq!(without.session_key(), "user-1");
    }
}
