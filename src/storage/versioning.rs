// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stored-key schema versions.
//!
//! Each version pins the KDF parameters its blobs were written with. Any
//! record whose version is below `current` is stale and gets re-encrypted
//! under the current parameters on its next successful read.

use std::collections::BTreeMap;

use crate::crypto::KdfParams;

/// Current stored-key version.
pub const CURRENT_KEY_VERSION: u32 = 2;

/// PBKDF2 iterations used by version 1 records.
pub const V1_ITERATIONS: u32 = 100_000;

/// PBKDF2 iterations used by version 2 records.
pub const V2_ITERATIONS: u32 = 310_000;

#[derive(Debug, Clone)]
pub struct KeyVersioning {
    current: u32,
    params: BTreeMap<u32, KdfParams>,
}

impl Default for KeyVersioning {
    fn default() -> Self {
        let mut params = BTreeMap::new();
        if let Some(v1) = KdfParams::from_iterations(V1_ITERATIONS) {
            params.insert(1, v1);
        }
        if let Some(v2) = KdfParams::from_iterations(V2_ITERATIONS) {
            params.insert(2, v2);
        }
        Self {
            current: CURRENT_KEY_VERSION,
            params,
        }
    }
}

impl KeyVersioning {
    /// Empty schedule with the given current version; register parameters
    /// with [`KeyVersioning::with_params`].
    pub fn new(current: u32) -> Self {
        Self {
            current,
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, version: u32, params: KdfParams) -> Self {
        self.params.insert(version, params);
        self
    }

    /// Move the current version (must have parameters registered).
    pub fn with_current(mut self, current: u32) -> Self {
        self.current = current;
        self
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn current_params(&self) -> Option<KdfParams> {
        self.params_for(self.current)
    }

    pub fn params_for(&self, version: u32) -> Option<KdfParams> {
        self.params.get(&version).copied()
    }

    pub fn is_stale(&self, version: u32) -> bool {
        version < self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let v = KeyVersioning::default();
        assert_eq!(v.current(), CURRENT_KEY_VERSION);
        assert_eq!(v.params_for(1).unwrap().iterations(), V1_ITERATIONS);
        assert_eq!(v.current_params().unwrap().iterations(), V2_ITERATIONS);
        assert!(v.params_for(3).is_none());
    }

    #[test]
    fn staleness_is_relative_to_current() {
        let v = KeyVersioning::default();
        assert!(v.is_stale(1));
        assert!(!v.is_stale(2));
        assert!(!v.is_stale(3));
    }
}
