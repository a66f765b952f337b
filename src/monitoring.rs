// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security event log.
//!
//! Rate limit blocks, lockouts, failed unlocks and key lifecycle events are
//! appended as JSON lines to a daily file and mirrored to `tracing`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::StoragePaths;

/// Types of security events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    // Rate limiting
    RateLimitExceeded,
    RateLimitStoreFailure,

    // Session password
    SessionPasswordSet,
    SessionPasswordCleared,
    SessionLockedOut,

    // Key lifecycle
    KeyStored,
    KeyStorePartial,
    KeyUnlockFailed,
    KeyRecovered,
    KeyMigrationFailed,
    KeyPasswordChanged,
    TransactionSigned,

    // Auth
    AuthFailure,
}

/// One security log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub request_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            ip_address: None,
            request_id: None,
            details: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<impl Into<String>>) -> Self {
        self.ip_address = ip.map(Into::into);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityLogError {
    #[error("security log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("security log serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

/// Sink for security events.
pub trait SecurityMonitor: Send + Sync {
    /// Record an event. Must not fail the calling request.
    fn record(&self, event: SecurityEvent);
}

/// Discards events after tracing them.
#[derive(Debug, Default)]
pub struct TracingMonitor;

impl SecurityMonitor for TracingMonitor {
    fn record(&self, event: SecurityEvent) {
        trace_event(&event);
    }
}

fn trace_event(event: &SecurityEvent) {
    tracing::warn!(
        target: "security",
        event_type = ?event.event_type,
        user_id = event.user_id.as_deref().unwrap_or("-"),
        ip = event.ip_address.as_deref().unwrap_or("-"),
        request_id = event.request_id.as_deref().unwrap_or("-"),
        "Security event"
    );
}

/// JSONL file log, one file per UTC day.
pub struct SecurityLog {
    paths: StoragePaths,
    // Serializes appends from concurrent requests.
    write_lock: Mutex<()>,
}

impl SecurityLog {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an event to its day's file.
    pub fn append(&self, event: &SecurityEvent) -> Result<(), SecurityLogError> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.paths.security_events_file(&date);

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Events for one day (`YYYY-MM-DD`). A missing file is an empty day.
    pub fn read_events(&self, date: &str) -> Result<Vec<SecurityEvent>, SecurityLogError> {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| SecurityLogError::InvalidDate(format!("{date}: {e}")))?;

        let path = self.paths.security_events_file(date);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SecurityLogError::from))
            .collect()
    }
}

impl SecurityMonitor for SecurityLog {
    fn record(&self, event: SecurityEvent) {
        trace_event(&event);
        if let Err(e) = self.append(&event) {
            tracing::error!(error = %e, "Failed to persist security event");
        }
    }
}
