// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key Storage Manager.
//!
//! Associates one encrypted private key with each user across two
//! independent stores. PRIMARY is the source of truth; BACKUP mirrors it on
//! every write and is used to repair PRIMARY when a record is missing there.
//!
//! ## Write Policy
//!
//! Both store writes are attempted and the result is reported as a
//! [`StoreOutcome`]. Only [`StoreOutcome::BothOk`] counts as success. A
//! partial write is not rolled back: the store that did accept the record
//! still holds a valid, recoverable copy, and callers can mirror it later
//! with [`KeyStorageManager::resync_backup`].
//!
//! ## Read Policy
//!
//! PRIMARY first, then BACKUP (copying the record back into PRIMARY). A
//! missing record in both stores is `Ok(None)`, which callers must keep
//! distinct from a wrong password (`Err(KeyStorageError::Decryption)`).
//! Stale record versions are migrated on read, never on write.

use std::path::Path;
use std::sync::Arc;

use super::key_store::{KeyStore, KeyStoreError, RedbKeyStore};
use super::models::{record_timestamp, StoreKind, StoreOutcome, StoredKey};
use super::paths::StoragePaths;
use super::versioning::KeyVersioning;
use crate::crypto::{AesGcmCipher, CryptoError, EncryptedBlob, KdfParams, SecretCipher};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum KeyStorageError {
    /// Wrong password, or the stored blob is corrupted.
    #[error("unable to decrypt stored key: {0}")]
    Decryption(#[source] CryptoError),

    #[error("unable to encrypt key: {0}")]
    Encryption(#[source] CryptoError),

    /// Re-encryption of a stale record failed; the record is still on the
    /// old version.
    #[error("migration of key for user {user_id} from v{from} to v{to} failed: {reason}")]
    Migration {
        user_id: String,
        from: u32,
        to: u32,
        reason: String,
    },

    #[error("{kind} key store unavailable: {source}")]
    StoreUnavailable {
        kind: StoreKind,
        #[source]
        source: KeyStoreError,
    },

    #[error("stored key for user {user_id} has unsupported version {version}")]
    UnsupportedVersion { user_id: String, version: u32 },

    #[error("no stored key for user {0}")]
    NotFound(String),
}

impl KeyStorageError {
    fn unavailable(kind: StoreKind, source: KeyStoreError) -> Self {
        KeyStorageError::StoreUnavailable { kind, source }
    }

    /// Whether re-prompting for the password may help.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, KeyStorageError::Decryption(_))
    }
}

pub type KeyStorageResult<T> = Result<T, KeyStorageError>;

// =============================================================================
// KeyStorageManager
// =============================================================================

pub struct KeyStorageManager {
    primary: Arc<dyn KeyStore>,
    backup: Arc<dyn KeyStore>,
    cipher: Arc<dyn SecretCipher>,
    versioning: KeyVersioning,
}

impl KeyStorageManager {
    /// Build a manager over two stores.
    pub fn new(
        primary: Arc<dyn KeyStore>,
        backup: Arc<dyn KeyStore>,
        cipher: Arc<dyn SecretCipher>,
        versioning: KeyVersioning,
    ) -> Self {
        Self {
            primary,
            backup,
            cipher,
            versioning,
        }
    }

    /// Open both redb stores under `paths` and initialize their schema.
    pub fn open(paths: &StoragePaths, versioning: KeyVersioning) -> KeyStorageResult<Self> {
        let primary = open_store(StoreKind::Primary, &paths.primary_db())?;
        let backup = open_store(StoreKind::Backup, &paths.backup_db())?;

        let manager = Self::new(primary, backup, Arc::new(AesGcmCipher), versioning);
        manager.initialize_db(StoreKind::Primary)?;
        manager.initialize_db(StoreKind::Backup)?;
        Ok(manager)
    }

    pub fn versioning(&self) -> &KeyVersioning {
        &self.versioning
    }

    fn store(&self, kind: StoreKind) -> &dyn KeyStore {
        match kind {
            StoreKind::Primary => self.primary.as_ref(),
            StoreKind::Backup => self.backup.as_ref(),
        }
    }

    fn params_for(&self, user_id: &str, version: u32) -> KeyStorageResult<KdfParams> {
        self.versioning
            .params_for(version)
            .ok_or_else(|| KeyStorageError::UnsupportedVersion {
                user_id: user_id.to_string(),
                version,
            })
    }

    /// Create the schema of one store if absent. Idempotent.
    pub fn initialize_db(&self, kind: StoreKind) -> KeyStorageResult<()> {
        self.store(kind)
            .initialize()
            .map_err(|e| KeyStorageError::unavailable(kind, e))
    }

    // ========== Writes ==========

    /// Encrypt `secret` under `password` and write it to both stores.
    pub fn store_private_key(
        &self,
        user_id: &str,
        secret: &str,
        password: &str,
    ) -> KeyStorageResult<StoreOutcome> {
        let version = self.versioning.current();
        let params = self.params_for(user_id, version)?;
        let blob = self
            .cipher
            .encrypt(secret, password, params)
            .map_err(KeyStorageError::Encryption)?;

        let record = StoredKey::new(user_id, blob, version);
        let outcome = self.write_both(&record);

        match outcome {
            StoreOutcome::BothOk => {
                tracing::info!(user_id = %user_id, version, "Stored private key");
            }
            StoreOutcome::BothFailed => {
                tracing::error!(user_id = %user_id, "Private key write failed on both stores");
            }
            partial => {
                tracing::warn!(
                    user_id = %user_id,
                    outcome = ?partial,
                    "Private key stored in one store only"
                );
            }
        }

        Ok(outcome)
    }

    fn write_both(&self, record: &StoredKey) -> StoreOutcome {
        let primary_ok = self.write_one(StoreKind::Primary, record);
        let backup_ok = self.write_one(StoreKind::Backup, record);
        StoreOutcome::from_results(primary_ok, backup_ok)
    }

    fn write_one(&self, kind: StoreKind, record: &StoredKey) -> bool {
        match self.store(kind).put(record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    store = %kind,
                    user_id = %record.user_id,
                    error = %e,
                    "Key store write failed"
                );
                false
            }
        }
    }

    /// Re-encrypt a user's key under a new password.
    pub fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> KeyStorageResult<StoreOutcome> {
        let secret = self
            .retrieve_private_key(user_id, current_password)?
            .ok_or_else(|| KeyStorageError::NotFound(user_id.to_string()))?;
        self.store_private_key(user_id, &secret, new_password)
    }

    /// Copy the PRIMARY record into BACKUP (repairs a partial write).
    pub fn resync_backup(&self, user_id: &str) -> KeyStorageResult<bool> {
        let Some(record) = self.get_stored_key(user_id, StoreKind::Primary)? else {
            return Ok(false);
        };
        self.backup
            .put(&record)
            .map_err(|e| KeyStorageError::unavailable(StoreKind::Backup, e))?;
        tracing::info!(user_id = %user_id, "Backup key store resynchronized");
        Ok(true)
    }

    /// Remove a user's record from one store.
    pub fn delete_stored_key(&self, user_id: &str, kind: StoreKind) -> KeyStorageResult<bool> {
        self.store(kind)
            .delete(user_id)
            .map_err(|e| KeyStorageError::unavailable(kind, e))
    }

    // ========== Reads ==========

    /// Raw record lookup, no decryption.
    pub fn get_stored_key(
        &self,
        user_id: &str,
        kind: StoreKind,
    ) -> KeyStorageResult<Option<StoredKey>> {
        self.store(kind)
            .get(user_id)
            .map_err(|e| KeyStorageError::unavailable(kind, e))
    }

    /// Whether either store holds a record for the user.
    pub fn has_stored_key(&self, user_id: &str) -> bool {
        [StoreKind::Primary, StoreKind::Backup]
            .into_iter()
            .any(|kind| matches!(self.store(kind).get(user_id), Ok(Some(_))))
    }

    /// Copy the BACKUP record into PRIMARY.
    ///
    /// Returns `Ok(false)` when BACKUP has nothing for the user.
    pub fn attempt_recovery(&self, user_id: &str) -> KeyStorageResult<bool> {
        let Some(record) = self.get_stored_key(user_id, StoreKind::Backup)? else {
            return Ok(false);
        };
        self.primary
            .put(&record)
            .map_err(|e| KeyStorageError::unavailable(StoreKind::Primary, e))?;
        tracing::info!(user_id = %user_id, "Recovered private key from backup store");
        Ok(true)
    }

    /// Decrypt and return the user's private key.
    pub fn retrieve_private_key(
        &self,
        user_id: &str,
        password: &str,
    ) -> KeyStorageResult<Option<String>> {
        let Some(record) = self.load_record(user_id)? else {
            return Ok(None);
        };

        let params = self.params_for(user_id, record.version)?;
        let secret = self
            .cipher
            .decrypt(&record.encrypted_key, password, params)
            .map_err(KeyStorageError::Decryption)?;

        if self.versioning.is_stale(record.version) {
            self.migrate(record, &secret, password)?;
        } else {
            self.mark_verified(&record);
        }

        Ok(Some(secret))
    }

    /// PRIMARY, falling back to BACKUP with repair.
    fn load_record(&self, user_id: &str) -> KeyStorageResult<Option<StoredKey>> {
        match self.primary.get(user_id) {
            Ok(Some(record)) => return Ok(Some(record)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Primary key store unavailable, falling back to backup"
                );
            }
        }

        let Some(record) = self.get_stored_key(user_id, StoreKind::Backup)? else {
            return Ok(None);
        };

        match self.primary.put(&record) {
            Ok(()) => {
                tracing::info!(user_id = %user_id, "Recovered private key from backup store");
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Serving key from backup; primary repair failed"
                );
            }
        }

        Ok(Some(record))
    }

    fn migrate(&self, record: StoredKey, secret: &str, password: &str) -> KeyStorageResult<()> {
        let from = record.version;
        let to = self.versioning.current();
        let migration_error = |reason: String| KeyStorageError::Migration {
            user_id: record.user_id.clone(),
            from,
            to,
            reason,
        };

        let params = self
            .versioning
            .current_params()
            .ok_or_else(|| migration_error(format!("no KDF parameters for v{to}")))?;
        let blob = self
            .cipher
            .encrypt(secret, password, params)
            .map_err(|e| migration_error(e.to_string()))?;

        let migrated = StoredKey {
            encrypted_key: blob,
            version: to,
            last_verified: record_timestamp(),
            ..record.clone()
        };

        self.primary
            .put(&migrated)
            .map_err(|e| migration_error(format!("primary write failed: {e}")))?;
        match self.replace_if_current(StoreKind::Backup, &record.encrypted_key, &migrated) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    "Backup store holds a different record; migrated key not mirrored"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    error = %e,
                    "Migrated key not mirrored to backup store"
                );
            }
        }

        tracing::info!(user_id = %record.user_id, from, to, "Migrated stored key");
        Ok(())
    }

    /// Refresh `last_verified` in each store still holding this ciphertext.
    ///
    /// Stores holding another record, or none, are left untouched. Failures
    /// only log.
    fn mark_verified(&self, record: &StoredKey) {
        let verified = StoredKey {
            last_verified: record_timestamp(),
            ..record.clone()
        };
        for kind in [StoreKind::Primary, StoreKind::Backup] {
            if let Err(e) = self.replace_if_current(kind, &record.encrypted_key, &verified) {
                tracing::debug!(store = %kind, error = %e, "Failed to refresh last_verified");
            }
        }
    }

    /// Overwrite the user's record in `kind` only if it still holds
    /// `expected`. Returns whether the write happened.
    fn replace_if_current(
        &self,
        kind: StoreKind,
        expected: &EncryptedBlob,
        record: &StoredKey,
    ) -> Result<bool, KeyStoreError> {
        let store = self.store(kind);
        match store.get(&record.user_id)? {
            Some(current) if current.encrypted_key == *expected => {
                store.put(record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn open_store(kind: StoreKind, path: &Path) -> KeyStorageResult<Arc<dyn KeyStore>> {
    let store = RedbKeyStore::open(kind, path).map_err(|e| KeyStorageError::unavailable(kind, e))?;
    Ok(Arc::new(store))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const SECRET: &str = "3030020100300706052b8104000a04220420aabbccdd";
    const PASSWORD: &str = "StrongP@ssw0rd123!";

    fn fast_versioning() -> KeyVersioning {
        KeyVersioning::new(2)
            .with_params(1, KdfParams::from_iterations(500).unwrap())
            .with_params(2, KdfParams::from_iterations(1_000).unwrap())
    }

    fn stores(dir: &TempDir) -> (Arc<dyn KeyStore>, Arc<dyn KeyStore>) {
        let paths = StoragePaths::new(dir.path());
        (
            Arc::new(RedbKeyStore::open(StoreKind::Primary, &paths.primary_db()).unwrap()),
            Arc::new(RedbKeyStore::open(StoreKind::Backup, &paths.backup_db()).unwrap()),
        )
    }

    fn manager_with(
        primary: Arc<dyn KeyStore>,
        backup: Arc<dyn KeyStore>,
        cipher: Arc<dyn SecretCipher>,
    ) -> KeyStorageManager {
        let manager = KeyStorageManager::new(primary, backup, cipher, fast_versioning());
        manager.initialize_db(StoreKind::Primary).unwrap();
        manager.initialize_db(StoreKind::Backup).unwrap();
        manager
    }

    fn manager() -> (KeyStorageManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        (manager_with(primary, backup, Arc::new(AesGcmCipher)), dir)
    }

    /// Store whose writes can be switched off.
    struct FlakyStore {
        inner: Arc<dyn KeyStore>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn wrap(inner: Arc<dyn KeyStore>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            })
        }
    }

    impl KeyStore for FlakyStore {
        fn kind(&self) -> StoreKind {
            self.inner.kind()
        }
        fn initialize(&self) -> Result<(), KeyStoreError> {
            self.inner.initialize()
        }
        fn get(&self, user_id: &str) -> Result<Option<StoredKey>, KeyStoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(KeyStoreError::Unavailable("read disabled".into()));
            }
            self.inner.get(user_id)
        }
        fn put(&self, record: &StoredKey) -> Result<(), KeyStoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(KeyStoreError::Unavailable("write disabled".into()));
            }
            self.inner.put(record)
        }
        fn delete(&self, user_id: &str) -> Result<bool, KeyStoreError> {
            self.inner.delete(user_id)
        }
        fn clear(&self) -> Result<(), KeyStoreError> {
            self.inner.clear()
        }
    }

    /// Cipher that can be told to fail encryption.
    struct FailingEncryptCipher {
        fail: AtomicBool,
    }

    impl SecretCipher for FailingEncryptCipher {
        fn encrypt(
            &self,
            plaintext: &str,
            password: &str,
            params: KdfParams,
        ) -> Result<EncryptedBlob, CryptoError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CryptoError::Encryption("forced failure".into()));
            }
            AesGcmCipher.encrypt(plaintext, password, params)
        }

        fn decrypt(
            &self,
            blob: &EncryptedBlob,
            password: &str,
            params: KdfParams,
        ) -> Result<String, CryptoError> {
            AesGcmCipher.decrypt(blob, password, params)
        }
    }

    #[test]
    fn store_then_retrieve() {
        let (manager, _dir) = manager();
        let outcome = manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        assert_eq!(outcome, StoreOutcome::BothOk);

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));
    }

    #[test]
    fn both_stores_hold_identical_ciphertext() {
        let (manager, _dir) = manager();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        let primary = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        let backup = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        assert_eq!(primary.encrypted_key, backup.encrypted_key);
        assert_eq!(primary.version, 2);
    }

    #[test]
    fn missing_key_is_none_not_error() {
        let (manager, _dir) = manager();
        let result = manager.retrieve_private_key("no-such-user", "anything").unwrap();
        assert!(result.is_none());
        assert!(!manager.has_stored_key("no-such-user"));
    }

    #[test]
    fn wrong_password_propagates_decryption_error() {
        let (manager, _dir) = manager();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        let err = manager.retrieve_private_key("user-1", "Wr0ng-P@ssword!").unwrap_err();
        assert!(err.is_wrong_password());
        assert!(matches!(err, KeyStorageError::Decryption(CryptoError::Decryption)));
    }

    #[test]
    fn retrieve_recovers_from_backup_and_repopulates_primary() {
        let (manager, _dir) = manager();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        assert!(manager.delete_stored_key("user-1", StoreKind::Primary).unwrap());

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));
        assert!(manager.get_stored_key("user-1", StoreKind::Primary).unwrap().is_some());
    }

    #[test]
    fn retrieve_survives_dropped_primary_store() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let manager = manager_with(primary.clone(), backup, Arc::new(AesGcmCipher));
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        primary.clear().unwrap();

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));
        assert!(primary.get("user-1").unwrap().is_some());
    }

    #[test]
    fn retrieve_degrades_to_backup_when_primary_unavailable() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let flaky = FlakyStore::wrap(primary);
        let manager = manager_with(flaky.clone(), backup, Arc::new(AesGcmCipher));
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        flaky.fail_reads.store(true, Ordering::SeqCst);
        flaky.fail_writes.store(true, Ordering::SeqCst);

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));
    }

    #[test]
    fn attempt_recovery_copies_backup_into_primary() {
        let (manager, _dir) = manager();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        manager.delete_stored_key("user-1", StoreKind::Primary).unwrap();

        assert!(manager.attempt_recovery("user-1").unwrap());
        let primary = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        let backup = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        assert_eq!(primary.encrypted_key, backup.encrypted_key);

        assert!(!manager.attempt_recovery("nobody").unwrap());
    }

    #[test]
    fn partial_write_is_reported_and_resyncable() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let flaky_backup = FlakyStore::wrap(backup);
        let manager = manager_with(primary, flaky_backup.clone(), Arc::new(AesGcmCipher));

        flaky_backup.fail_writes.store(true, Ordering::SeqCst);
        let outcome = manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        assert_eq!(outcome, StoreOutcome::PrimaryOnlyOk);
        assert!(!outcome.is_success());
        assert!(manager.get_stored_key("user-1", StoreKind::Backup).unwrap().is_none());

        flaky_backup.fail_writes.store(false, Ordering::SeqCst);
        assert!(manager.resync_backup("user-1").unwrap());
        let primary = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        let backup = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        assert_eq!(primary.encrypted_key, backup.encrypted_key);
    }

    const NEW_SECRET: &str = "3030020100300706052b8104000a04220420eeff0011";
    const NEW_PASSWORD: &str = "AnotherP@ssw0rd456!";

    #[test]
    fn read_after_backup_only_write_keeps_newer_backup() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let flaky_primary = FlakyStore::wrap(primary);
        let manager = manager_with(flaky_primary.clone(), backup, Arc::new(AesGcmCipher));
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        flaky_primary.fail_writes.store(true, Ordering::SeqCst);
        let outcome = manager.store_private_key("user-1", NEW_SECRET, NEW_PASSWORD).unwrap();
        assert_eq!(outcome, StoreOutcome::BackupOnlyOk);
        let newer = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        flaky_primary.fail_writes.store(false, Ordering::SeqCst);

        // PRIMARY still answers with the older record.
        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));

        let backup = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        assert_eq!(backup, newer);
        manager.delete_stored_key("user-1", StoreKind::Primary).unwrap();
        let secret = manager.retrieve_private_key("user-1", NEW_PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(NEW_SECRET));
    }

    #[test]
    fn verified_read_refreshes_matching_stores_only() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let flaky_backup = FlakyStore::wrap(backup);
        let manager = manager_with(primary, flaky_backup.clone(), Arc::new(AesGcmCipher));

        flaky_backup.fail_writes.store(true, Ordering::SeqCst);
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        flaky_backup.fail_writes.store(false, Ordering::SeqCst);

        manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert!(manager.get_stored_key("user-1", StoreKind::Backup).unwrap().is_none());
    }

    #[test]
    fn migration_does_not_overwrite_newer_backup() {
        let (manager, _dir) = manager();
        write_v1_record(&manager, "user-1");

        let v2 = manager.versioning().params_for(2).unwrap();
        let blob = AesGcmCipher.encrypt(NEW_SECRET, NEW_PASSWORD, v2).unwrap();
        let newer = StoredKey::new("user-1", blob, 2);
        manager.backup.put(&newer).unwrap();

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));
        assert_eq!(manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap().version, 2);
        assert_eq!(manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap(), newer);
    }

    #[test]
    fn new_records_survive_persistence_unchanged() {
        let (manager, _dir) = manager();
        let blob = AesGcmCipher
            .encrypt(SECRET, PASSWORD, manager.versioning().current_params().unwrap())
            .unwrap();
        let record = StoredKey::new("user-1", blob, 2);
        manager.primary.put(&record).unwrap();

        let stored = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[test]
    fn both_writes_failing_is_reported() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let p = FlakyStore::wrap(primary);
        let b = FlakyStore::wrap(backup);
        let manager = manager_with(p.clone(), b.clone(), Arc::new(AesGcmCipher));
        p.fail_writes.store(true, Ordering::SeqCst);
        b.fail_writes.store(true, Ordering::SeqCst);

        let outcome = manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();
        assert_eq!(outcome, StoreOutcome::BothFailed);
    }

    fn write_v1_record(manager: &KeyStorageManager, user_id: &str) -> StoredKey {
        let v1 = manager.versioning().params_for(1).unwrap();
        let blob = AesGcmCipher.encrypt(SECRET, PASSWORD, v1).unwrap();
        let record = StoredKey::new(user_id, blob, 1);
        manager.primary.put(&record).unwrap();
        manager.backup.put(&record).unwrap();
        record
    }

    #[test]
    fn stale_record_is_migrated_on_read() {
        let (manager, _dir) = manager();
        let old = write_v1_record(&manager, "user-1");

        let secret = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));

        let primary = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        let backup = manager.get_stored_key("user-1", StoreKind::Backup).unwrap().unwrap();
        assert_eq!(primary.version, 2);
        assert_ne!(primary.encrypted_key, old.encrypted_key);
        assert_eq!(primary.encrypted_key, backup.encrypted_key);
        assert_eq!(primary.created_at, old.created_at);

        // Second read goes through the current-version path.
        let again = manager.retrieve_private_key("user-1", PASSWORD).unwrap();
        assert_eq!(again.as_deref(), Some(SECRET));
    }

    #[test]
    fn failed_migration_raises_migration_error() {
        let dir = TempDir::new().unwrap();
        let (primary, backup) = stores(&dir);
        let cipher = Arc::new(FailingEncryptCipher {
            fail: AtomicBool::new(false),
        });
        let manager = manager_with(primary, backup, cipher.clone());
        write_v1_record(&manager, "user-1");

        cipher.fail.store(true, Ordering::SeqCst);
        let err = manager.retrieve_private_key("user-1", PASSWORD).unwrap_err();
        assert!(matches!(err, KeyStorageError::Migration { from: 1, to: 2, .. }));

        let primary = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        assert_eq!(primary.version, 1);
    }

    #[test]
    fn stores_never_migrate_on_write() {
        let (manager, _dir) = manager();
        write_v1_record(&manager, "user-1");
        manager.store_private_key("user-2", SECRET, PASSWORD).unwrap();

        let untouched = manager.get_stored_key("user-1", StoreKind::Primary).unwrap().unwrap();
        assert_eq!(untouched.version, 1);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let (manager, _dir) = manager();
        let blob = AesGcmCipher
            .encrypt(SECRET, PASSWORD, KdfParams::from_iterations(500).unwrap())
            .unwrap();
        manager.primary.put(&StoredKey::new("user-1", blob, 9)).unwrap();

        let err = manager.retrieve_private_key("user-1", PASSWORD).unwrap_err();
        assert!(matches!(err, KeyStorageError::UnsupportedVersion { version: 9, .. }));
    }

    #[test]
    fn change_password_reencrypts() {
        let (manager, _dir) = manager();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        let outcome = manager
            .change_password("user-1", PASSWORD, "N3w-StrongP@ssword")
            .unwrap();
        assert!(outcome.is_success());

        assert!(manager.retrieve_private_key("user-1", PASSWORD).is_err());
        let secret = manager.retrieve_private_key("user-1", "N3w-StrongP@ssword").unwrap();
        assert_eq!(secret.as_deref(), Some(SECRET));

        assert!(matches!(
            manager.change_password("nobody", "a", "b"),
            Err(KeyStorageError::NotFound(_))
        ));
    }

    #[test]
    fn open_creates_both_databases() {
        let dir = TempDir::new().unwrap();
        let paths = StoragePaths::new(dir.path());
        let manager = KeyStorageManager::open(&paths, fast_versioning()).unwrap();
        manager.store_private_key("user-1", SECRET, PASSWORD).unwrap();

        assert!(paths.primary_db().exists());
        assert!(paths.backup_db().exists());
    }
}
