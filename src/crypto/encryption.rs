// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password-based authenticated encryption of secret strings.
//!
//! ## Blob Layout
//!
//! ```text
//! base64( salt (16) || nonce (12) || ciphertext || tag (16) )
//! ```
//!
//! The key is derived with PBKDF2-HMAC-SHA256 (256-bit output) from the
//! password and a fresh random salt; the plaintext is sealed with
//! AES-256-GCM under a fresh random nonce. Every call to [`encrypt`] therefore
//! yields a different blob, and a wrong password or any modified byte makes
//! [`decrypt`] fail with [`CryptoError::Decryption`].

use std::num::NonZeroU32;

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = NONCE_LEN;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Derived key length (AES-256).
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count used for newly written records.
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Errors raised by the encryption primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Wrong password, or the blob was corrupted or tampered with.
    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,

    /// The blob cannot be split into salt, nonce and ciphertext.
    #[error("malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("secure random generator unavailable")]
    Random,
}

/// Opaque, self-contained ciphertext package (see module docs for layout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    /// Wrap an already-encoded blob (e.g. read back from storage).
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key derivation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: NonZeroU32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::with_iterations(NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN))
    }
}

impl KdfParams {
    pub const fn with_iterations(iterations: NonZeroU32) -> Self {
        Self { iterations }
    }

    /// Build from a raw count; `None` when the count is zero.
    pub fn from_iterations(iterations: u32) -> Option<Self> {
        NonZeroU32::new(iterations).map(Self::with_iterations)
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }
}

/// Encryption capability used by the key storage manager.
///
/// [`AesGcmCipher`] is the production implementation; the trait exists so
/// storage code can be driven with alternative ciphers.
pub trait SecretCipher: Send + Sync {
    fn encrypt(
        &self,
        plaintext: &str,
        password: &str,
        params: KdfParams,
    ) -> Result<EncryptedBlob, CryptoError>;

    fn decrypt(
        &self,
        blob: &EncryptedBlob,
        password: &str,
        params: KdfParams,
    ) -> Result<String, CryptoError>;
}

/// PBKDF2 + AES-256-GCM cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

impl SecretCipher for AesGcmCipher {
    fn encrypt(
        &self,
        plaintext: &str,
        password: &str,
        params: KdfParams,
    ) -> Result<EncryptedBlob, CryptoError> {
        encrypt_with(plaintext, password, params)
    }

    fn decrypt(
        &self,
        blob: &EncryptedBlob,
        password: &str,
        params: KdfParams,
    ) -> Result<String, CryptoError> {
        decrypt_with(blob, password, params)
    }
}

/// Encrypt `plaintext` under `password` with the default KDF parameters.
pub fn encrypt(plaintext: &str, password: &str) -> Result<EncryptedBlob, CryptoError> {
    encrypt_with(plaintext, password, KdfParams::default())
}

/// Decrypt a blob produced by [`encrypt`].
pub fn decrypt(blob: &EncryptedBlob, password: &str) -> Result<String, CryptoError> {
    decrypt_with(blob, password, KdfParams::default())
}

/// Encrypt with explicit KDF parameters.
pub fn encrypt_with(
    plaintext: &str,
    password: &str,
    params: KdfParams,
) -> Result<EncryptedBlob, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;

    let key = derive_key(password, &salt, params);
    let sealed = seal(&key, plaintext.as_bytes())?;

    let mut out = Vec::with_capacity(SALT_LEN + sealed.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);

    Ok(EncryptedBlob(Base64::encode_string(&out)))
}

/// Decrypt with explicit KDF parameters.
pub fn decrypt_with(
    blob: &EncryptedBlob,
    password: &str,
    params: KdfParams,
) -> Result<String, CryptoError> {
    let raw = Base64::decode_vec(blob.as_str())
        .map_err(|e| CryptoError::MalformedBlob(format!("invalid base64: {e}")))?;

    if raw.len() < SALT_LEN + IV_LEN + TAG_LEN {
        return Err(CryptoError::MalformedBlob(format!(
            "blob is {} bytes, need at least {}",
            raw.len(),
            SALT_LEN + IV_LEN + TAG_LEN
        )));
    }

    let (salt, sealed) = raw.split_at(SALT_LEN);
    let key = derive_key(password, salt, params);
    let plaintext = open(&key, sealed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Decryption)
}

/// Seal `plaintext` under a raw 256-bit key.
///
/// Output is `nonce (12) || ciphertext || tag (16)`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce_bytes = [0u8; IV_LEN];
    fill_random(&mut nonce_bytes)?;

    let sealing_key = aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Encryption("AES-GCM seal failed".to_string()))?;

    let mut out = Vec::with_capacity(IV_LEN + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Open a value produced by [`seal`].
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < IV_LEN + TAG_LEN {
        return Err(CryptoError::MalformedBlob(format!(
            "sealed value is {} bytes, need at least {}",
            sealed.len(),
            IV_LEN + TAG_LEN
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(IV_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CryptoError::MalformedBlob("bad nonce length".to_string()))?;

    let opening_key = aead_key(key)?;
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = opening_key
        .open_in_place(nonce, Aad::empty(), in_out.as_mut_slice())
        .map_err(|_| CryptoError::Decryption)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Fill `buf` from the operating system RNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new().fill(buf).map_err(|_| CryptoError::Random)
}

fn derive_key(password: &str, salt: &[u8], params: KdfParams) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        params.iterations,
        salt,
        password.as_bytes(),
        &mut key[..],
    );
    key
}

fn aead_key(key: &[u8; KEY_LEN]) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| CryptoError::Encryption("invalid AES-256 key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}
