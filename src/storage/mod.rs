// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Storage Module
//!
//! Persists one encrypted private key per user in two independent redb
//! databases (PRIMARY and BACKUP).
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   keys/
//!     primary.redb    # stored_keys: user_id -> StoredKey (JSON)
//!     backup.redb     # mirror of primary.redb
//!     key_material    # local key material (hex)
//!   security/
//!     {date}/events.jsonl
//! ```
//!
//! ## Important Notes
//!
//! - Only ciphertext is ever written; plaintext keys stay in memory
//! - Records are never deleted implicitly
//! - Stale record versions are migrated on read only

pub mod key_store;
pub mod manager;
pub mod models;
pub mod paths;
pub mod versioning;

pub use key_store::{KeyStore, KeyStoreError, KeyStoreResult, RedbKeyStore};
pub use manager::{KeyStorageError, KeyStorageManager, KeyStorageResult};
pub use models::{record_timestamp, StoreKind, StoreOutcome, StoredKey, StoredKeyInfo, LEGACY_VERSION};
pub use paths::StoragePaths;
pub use versioning::{KeyVersioning, CURRENT_KEY_VERSION, V1_ITERATIONS, V2_ITERATIONS};
