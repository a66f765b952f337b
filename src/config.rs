// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed [`AppConfig`] loaded
//! from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root for key stores, key material and security log | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `SUPABASE_JWT_SECRET` | HS256 secret for session tokens | Required for production |
//! | `SUPABASE_JWT_ISSUER` | Expected `iss` claim | Optional |
//! | `KEY_STORE_VERSION` | Current stored-key schema version | `2` |
//! | `SESSION_PASSWORD_EXPIRY_MINUTES` | Session password cache lifetime | `30` |
//! | `RATE_LIMIT_FAIL_CLOSED` | Comma-separated limit types that fail closed | empty |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate chain and key | Plain HTTP if unset |

use std::path::PathBuf;

use crate::rate_limit::LimitType;
use crate::session::DEFAULT_EXPIRY_MINUTES;
use crate::storage::{paths::DATA_ROOT, CURRENT_KEY_VERSION};

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const JWT_SECRET_ENV: &str = "SUPABASE_JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "SUPABASE_JWT_ISSUER";
pub const KEY_STORE_VERSION_ENV: &str = "KEY_STORE_VERSION";
pub const SESSION_EXPIRY_ENV: &str = "SESSION_PASSWORD_EXPIRY_MINUTES";
pub const RATE_LIMIT_FAIL_CLOSED_ENV: &str = "RATE_LIMIT_FAIL_CLOSED";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Default `RUST_LOG` filter.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// `json` or `pretty`; anything else is pretty.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("json") => LogFormat::Json,
            Some("pretty") | Some("") | None => LogFormat::Pretty,
            Some(other) => {
                tracing::warn!(value = other, "Unknown LOG_FORMAT, using pretty");
                LogFormat::Pretty
            }
        }
    }

    /// Read `LOG_FORMAT` alone, before the subscriber exists.
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub key_store_version: u32,
    pub session_expiry_minutes: u64,
    pub fail_closed: Vec<LimitType>,
    pub tls: Option<TlsPaths>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DATA_ROOT),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_format: LogFormat::default(),
            jwt_secret: None,
            jwt_issuer: None,
            key_store_version: CURRENT_KEY_VERSION,
            session_expiry_minutes: DEFAULT_EXPIRY_MINUTES,
            fail_closed: Vec::new(),
            tls: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let fail_closed = get(RATE_LIMIT_FAIL_CLOSED_ENV)
            .map(|list| {
                list.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| match s.parse::<LimitType>() {
                        Ok(limit) => Some(limit),
                        Err(e) => {
                            tracing::warn!(error = %e, "Ignoring {RATE_LIMIT_FAIL_CLOSED_ENV} entry");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                tracing::warn!("Only one of TLS_CERT_PATH/TLS_KEY_PATH is set, serving plain HTTP");
                None
            }
        };

        Self {
            data_dir: get(DATA_DIR_ENV).map(PathBuf::from).unwrap_or(defaults.data_dir),
            host: get(HOST_ENV).unwrap_or(defaults.host),
            port: parse_or(get(PORT_ENV), PORT_ENV, defaults.port),
            log_format: LogFormat::parse(get(LOG_FORMAT_ENV).as_deref()),
            jwt_secret: get(JWT_SECRET_ENV),
            jwt_issuer: get(JWT_ISSUER_ENV),
            key_store_version: parse_or(
                get(KEY_STORE_VERSION_ENV),
                KEY_STORE_VERSION_ENV,
                defaults.key_store_version,
            ),
            session_expiry_minutes: parse_or(
                get(SESSION_EXPIRY_ENV),
                SESSION_EXPIRY_ENV,
                defaults.session_expiry_minutes,
            )
            .max(1),
            fail_closed,
            tls,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }),
    }
}
