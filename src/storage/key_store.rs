// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key stores backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `stored_keys`: user_id → serialized [`StoredKey`] (JSON bytes)
//!
//! PRIMARY and BACKUP are two separate database files, so the failure of
//! one never affects the other.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition, TableError};

use super::models::{StoreKind, StoredKey};

// =============================================================================
// Table Definitions
// =============================================================================

/// user_id → serialized StoredKey (JSON bytes).
const STORED_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("stored_keys");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

// =============================================================================
// KeyStore
// =============================================================================

/// One persistence store for encrypted keys.
pub trait KeyStore: Send + Sync {
    /// Which role this store plays.
    fn kind(&self) -> StoreKind;

    /// Create the schema if absent; no-op otherwise.
    fn initialize(&self) -> KeyStoreResult<()>;

    fn get(&self, user_id: &str) -> KeyStoreResult<Option<StoredKey>>;

    /// Insert or replace the record for `record.user_id`.
    fn put(&self, record: &StoredKey) -> KeyStoreResult<()>;

    /// Remove a record. Returns whether one existed.
    fn delete(&self, user_id: &str) -> KeyStoreResult<bool>;

    /// Drop every record in the store.
    fn clear(&self) -> KeyStoreResult<()>;
}

/// redb-backed key store.
pub struct RedbKeyStore {
    kind: StoreKind,
    db: Database,
}

impl RedbKeyStore {
    /// Open (or create) the database file at the given path.
    ///
    /// The table itself is created by [`KeyStore::initialize`].
    pub fn open(kind: StoreKind, path: &Path) -> KeyStoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KeyStoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let db = Database::create(path)?;
        Ok(Self { kind, db })
    }
}

impl KeyStore for RedbKeyStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    fn initialize(&self) -> KeyStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(STORED_KEYS)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, user_id: &str) -> KeyStoreResult<Option<StoredKey>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(STORED_KEYS) {
            Ok(table) => table,
            // Never initialized or cleared: no records.
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match table.get(user_id)? {
            Some(value) => {
                let record: StoredKey = serde_json::from_slice(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put(&self, record: &StoredKey) -> KeyStoreResult<()> {
        let json = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STORED_KEYS)?;
            table.insert(record.user_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, user_id: &str) -> KeyStoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(STORED_KEYS)?;
            let removed = table.remove(user_id)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn clear(&self) -> KeyStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        write_txn.delete_table(STORED_KEYS)?;
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptedBlob;

    fn temp_store() -> (RedbKeyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKeyStore::open(StoreKind::Primary, &dir.path().join("primary.redb")).unwrap();
        store.initialize().unwrap();
        (store, dir)
    }

    fn record(user_id: &str) -> StoredKey {
        StoredKey::new(user_id, EncryptedBlob::from_encoded("c2FsdA=="), 2)
    }

    #[test]
    fn put_and_get() {
        let (store, _dir) = temp_store();
        store.put(&record("user-1")).unwrap();

        let read = store.get("user-1").unwrap().unwrap();
        assert_eq!(read.user_id, "user-1");
        assert_eq!(read.encrypted_key.as_str(), "c2FsdA==");
        assert!(store.get("user-2").unwrap().is_none());
    }

    #[test]
    fn initialize_is_idempotent() {
        let (store, _dir) = temp_store();
        store.put(&record("user-1")).unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();
        assert!(store.get("user-1").unwrap().is_some());
    }

    #[test]
    fn get_before_initialize_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbKeyStore::open(StoreKind::Backup, &dir.path().join("b.redb")).unwrap();
        assert!(store.get("user-1").unwrap().is_none());
        assert_eq!(store.kind(), StoreKind::Backup);
    }

    #[test]
    fn put_replaces_existing_record() {
        let (store, _dir) = temp_store();
        store.put(&record("user-1")).unwrap();

        let mut updated = record("user-1");
        updated.encrypted_key = EncryptedBlob::from_encoded("bmV3");
        store.put(&updated).unwrap();

        assert_eq!(store.get("user-1").unwrap().unwrap().encrypted_key.as_str(), "bmV3");
    }

    #[test]
    fn delete_reports_existence() {
        let (store, _dir) = temp_store();
        store.put(&record("user-1")).unwrap();

        assert!(store.delete("user-1").unwrap());
        assert!(!store.delete("user-1").unwrap());
        assert!(store.get("user-1").unwrap().is_none());
    }

    #[test]
    fn clear_drops_all_records() {
        let (store, _dir) = temp_store();
        store.put(&record("user-1")).unwrap();
        store.put(&record("user-2")).unwrap();

        store.clear().unwrap();
        assert!(store.get("user-1").unwrap().is_none());

        store.initialize().unwrap();
        store.put(&record("user-3")).unwrap();
        assert!(store.get("user-3").unwrap().is_some());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("primary.redb");
        {
            let store = RedbKeyStore::open(StoreKind::Primary, &path).unwrap();
            store.initialize().unwrap();
            store.put(&record("user-1")).unwrap();
        }
        let store = RedbKeyStore::open(StoreKind::Primary, &path).unwrap();
        assert!(store.get("user-1").unwrap().is_some());
    }
}
