// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Limit catalogue and route mapping.

use std::str::FromStr;

use axum::http::Method;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Operation categories with their own limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Auth,
    Wallet,
    Reset,
    Create,
    Backup,
    Sign,
}

/// Static limit for one [`LimitType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitConfig {
    /// Requests allowed per window.
    pub max_requests: u64,
    /// Window length.
    pub window_ms: u64,
    /// Hard block applied once a window reaches twice `max_requests`.
    pub block_ms: u64,
}

impl LimitType {
    pub const ALL: [LimitType; 6] = [
        LimitType::Auth,
        LimitType::Wallet,
        LimitType::Reset,
        LimitType::Create,
        LimitType::Backup,
        LimitType::Sign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Auth => "auth",
            LimitType::Wallet => "wallet",
            LimitType::Reset => "reset",
            LimitType::Create => "create",
            LimitType::Backup => "backup",
            LimitType::Sign => "sign",
        }
    }

    pub const fn config(&self) -> LimitConfig {
        match self {
            LimitType::Auth => LimitConfig {
                max_requests: 5,
                window_ms: 15 * MINUTE_MS,
                block_ms: HOUR_MS,
            },
            LimitType::Wallet => LimitConfig {
                max_requests: 10,
                window_ms: MINUTE_MS,
                block_ms: 5 * MINUTE_MS,
            },
            LimitType::Reset => LimitConfig {
                max_requests: 3,
                window_ms: HOUR_MS,
                block_ms: 24 * HOUR_MS,
            },
            LimitType::Create => LimitConfig {
                max_requests: 3,
                window_ms: HOUR_MS,
                block_ms: 24 * HOUR_MS,
            },
            LimitType::Backup => LimitConfig {
                max_requests: 5,
                window_ms: HOUR_MS,
                block_ms: 6 * HOUR_MS,
            },
            LimitType::Sign => LimitConfig {
                max_requests: 20,
                window_ms: MINUTE_MS,
                block_ms: 15 * MINUTE_MS,
            },
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LimitType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown limit type: {s}"))
    }
}

/// Path prefixes that are rate limited.
const ROUTE_LIMITS: &[(&str, LimitType)] = &[
    ("/api/auth", LimitType::Auth),
    ("/api/auth/reset", LimitType::Reset),
    ("/api/wallet", LimitType::Wallet),
    ("/api/wallet/create", LimitType::Create),
    ("/api/wallet/backup", LimitType::Backup),
    ("/api/wallet/sign", LimitType::Sign),
];

/// Longest matching prefix (on a path-segment boundary) wins.
pub fn limit_type_for_path(path: &str) -> Option<LimitType> {
    ROUTE_LIMITS
        .iter()
        .filter(|(prefix, _)| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, limit)| *limit)
}

/// Read-only status routes limited as `wallet` reads instead of by prefix.
const STATUS_ROUTES: &[&str] = &["/api/auth/session-password"];

/// [`limit_type_for_path`], except that `GET` on a status route counts as a
/// `wallet` read so polling the cache state cannot exhaust the auth limit.
pub fn limit_type_for_request(method: &Method, path: &str) -> Option<LimitType> {
    if *method == Method::GET && STATUS_ROUTES.contains(&path.trim_end_matches('/')) {
        return Some(LimitType::Wallet);
    }
    limit_type_for_path(path)
}
