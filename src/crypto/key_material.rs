// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Stable local key material.
//!
//! A 32-byte random token generated on first start and kept next to the key
//! stores. It never encrypts user secrets directly; sub-keys derived from it
//! seal values that would otherwise sit in process memory as plaintext (the
//! cached session password). Losing the file only invalidates those cached
//! values, never a stored key.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::encryption::{fill_random, CryptoError, KEY_LEN};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    #[error("key material I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("key material file is corrupted: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Local key material token.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

impl KeyMaterial {
    /// Fresh random material that is not persisted anywhere.
    pub fn ephemeral() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Load the material stored at `path`, creating it on first use.
    ///
    /// The file holds 64 hex characters and is created with mode 0600 on
    /// Unix.
    pub fn load_or_create(path: &Path) -> Result<Self, KeyMaterialError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_hex(contents.trim()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let material = Self::ephemeral()?;
                write_private_file(path, hex::encode(material.0).as_bytes())?;
                tracing::info!(path = %path.display(), "Created local key material");
                Ok(material)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn from_hex(encoded: &str) -> Result<Self, KeyMaterialError> {
        let mut bytes = [0u8; KEY_LEN];
        hex::decode_to_slice(encoded, &mut bytes)
            .map_err(|e| KeyMaterialError::Corrupted(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Derive a purpose-bound 256-bit sub-key (HMAC-SHA256 over `label`).
    pub fn derive_subkey(&self, label: &str) -> [u8; KEY_LEN] {
        // HMAC accepts keys of any length, so construction cannot fail.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(label.as_bytes());
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }
}

fn write_private_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()
}
