// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the on-disk layout.
//!
//! ```text
//! {root}/
//!   keys/
//!     primary.redb      # PRIMARY key store
//!     backup.redb       # BACKUP key store
//!     key_material      # local key material (hex, 0600)
//!   security/
//!     {date}/events.jsonl
//! ```

use std::path::{Path, PathBuf};

/// Default data root when `DATA_DIR` is not set.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Key Store Paths ==========

    /// Directory holding both key stores and the key material.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// PRIMARY key store database.
    pub fn primary_db(&self) -> PathBuf {
        self.keys_dir().join("primary.redb")
    }

    /// BACKUP key store database.
    pub fn backup_db(&self) -> PathBuf {
        self.keys_dir().join("backup.redb")
    }

    /// Local key material file.
    pub fn key_material(&self) -> PathBuf {
        self.keys_dir().join("key_material")
    }

    // ========== Security Log Paths ==========

    /// Directory containing security event logs.
    pub fn security_dir(&self) -> PathBuf {
        self.root.join("security")
    }

    /// Path to a daily security events file (JSONL format).
    pub fn security_events_file(&self, date: &str) -> PathBuf {
        self.security_dir().join(date).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
    }

    #[test]
    fn key_store_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/lynx");
        assert_eq!(paths.primary_db(), PathBuf::from("/tmp/lynx/keys/primary.redb"));
        assert_eq!(paths.backup_db(), PathBuf::from("/tmp/lynx/keys/backup.redb"));
        assert_eq!(paths.key_material(), PathBuf::from("/tmp/lynx/keys/key_material"));
    }

    #[test]
    fn security_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/lynx");
        assert_eq!(paths.security_dir(), PathBuf::from("/tmp/lynx/security"));
        assert_eq!(
            paths.security_events_file("2026-01-28"),
            PathBuf::from("/tmp/lynx/security/2026-01-28/events.jsonl")
        );
    }
}
