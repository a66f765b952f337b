// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Encryption Primitive
//!
//! Password-based encryption for private keys and the local key material
//! used to seal cached session passwords.
//!
//! - `encryption` - PBKDF2-HMAC-SHA256 + AES-256-GCM blobs
//! - `key_material` - per-installation random token and sub-key derivation

pub mod encryption;
pub mod key_material;

pub use encryption::{
    decrypt, decrypt_with, encrypt, encrypt_with, AesGcmCipher, CryptoError, EncryptedBlob,
    KdfParams, SecretCipher,
};
pub use key_material::{KeyMaterial, KeyMaterialError};
