// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted key record and store identifiers.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::crypto::EncryptedBlob;

/// Schema version assumed for records written before versioning existed.
pub const LEGACY_VERSION: u32 = 1;

fn legacy_version() -> u32 {
    LEGACY_VERSION
}

/// Which of the two redundant stores a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Source of truth.
    Primary,
    /// Best-effort mirror of PRIMARY.
    Backup,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Primary => "primary",
            StoreKind::Backup => "backup",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encrypted private key persisted for one user.
///
/// Field names are the durable on-disk contract. Records written by older
/// versions may lack `version` or the timestamps; those default to
/// [`LEGACY_VERSION`] and the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub user_id: String,
    pub encrypted_key: EncryptedBlob,
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub last_verified: DateTime<Utc>,
}

/// Current time at the millisecond precision records are persisted with.
pub fn record_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl StoredKey {
    pub fn new(user_id: impl Into<String>, encrypted_key: EncryptedBlob, version: u32) -> Self {
        let now = record_timestamp();
        Self {
            user_id: user_id.into(),
            encrypted_key,
            version,
            created_at: now,
            last_verified: now,
        }
    }
}

/// Result of a dual-store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    BothOk,
    PrimaryOnlyOk,
    BackupOnlyOk,
    BothFailed,
}

impl StoreOutcome {
    pub fn from_results(primary_ok: bool, backup_ok: bool) -> Self {
        match (primary_ok, backup_ok) {
            (true, true) => StoreOutcome::BothOk,
            (true, false) => StoreOutcome::PrimaryOnlyOk,
            (false, true) => StoreOutcome::BackupOnlyOk,
            (false, false) => StoreOutcome::BothFailed,
        }
    }

    /// Only a write that reached both stores counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, StoreOutcome::BothOk)
    }

    /// At least one store holds the new record.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, StoreOutcome::BothFailed)
    }
}

/// Key metadata safe to return to clients (no ciphertext).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredKeyInfo {
    /// Store the record was read from.
    pub store: StoreKind,
    /// Record schema version.
    pub version: u32,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// Last successful decryption.
    pub last_verified: DateTime<Utc>,
}

impl StoredKeyInfo {
    pub fn from_record(store: StoreKind, record: &StoredKey) -> Self {
        Self {
            store,
            version: record.version,
            created_at: record.created_at,
            last_verified: record.last_verified,
        }
    }
}
