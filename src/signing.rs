// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transaction signing with an unlocked private key.
//!
//! Transactions are opaque bytes built by the client; this module only turns
//! the decrypted secret into a signer and signs them. Accepted secret
//! formats:
//!
//! - 64 hex characters (raw secp256k1 scalar, optional `0x`)
//! - hex DER as exported by Hedera for ECDSA(secp256k1) keys
//! - hex PKCS#8 / SEC1 DER
//! - PEM (`PRIVATE KEY` or `EC PRIVATE KEY`)

use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use k256::pkcs8::DecodePrivateKey;
use k256::SecretKey;
use serde::Serialize;
use utoipa::ToSchema;

/// DER header Hedera puts in front of a raw ECDSA(secp256k1) key.
const HEDERA_ECDSA_DER_PREFIX: &str = "3030020100300706052b8104000a04220420";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("empty transaction")]
    EmptyTransaction,
}

/// Signature over one transaction.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SignedTransaction {
    /// Signed bytes (hex).
    pub transaction: String,
    /// ECDSA signature `r || s` (hex, 64 bytes).
    pub signature: String,
    /// Compressed SEC1 public key (hex, 33 bytes).
    pub public_key: String,
}

/// Signing capability handed the plaintext secret for a single operation.
pub trait TransactionSigner: Send + Sync {
    fn sign(&self, secret: &str, transaction: &[u8]) -> Result<SignedTransaction, SigningError>;
}

/// ECDSA over secp256k1 with SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Signer;

impl TransactionSigner for Secp256k1Signer {
    fn sign(&self, secret: &str, transaction: &[u8]) -> Result<SignedTransaction, SigningError> {
        if transaction.is_empty() {
            return Err(SigningError::EmptyTransaction);
        }

        let signing_key = SigningKey::from(parse_secret_key(secret)?);
        let signature: Signature = signing_key.sign(transaction);
        let public_key = signing_key.verifying_key().to_encoded_point(true);

        Ok(SignedTransaction {
            transaction: hex::encode(transaction),
            signature: hex::encode(signature.to_bytes()),
            public_key: hex::encode(public_key.as_bytes()),
        })
    }
}

/// Parse a secret in any of the accepted formats.
pub fn parse_secret_key(secret: &str) -> Result<SecretKey, SigningError> {
    let secret = secret.trim();
    if secret.starts_with("-----BEGIN") {
        return parse_pem(secret);
    }

    let hex_str = secret.strip_prefix("0x").unwrap_or(secret).to_ascii_lowercase();
    let raw_hex = hex_str
        .strip_prefix(HEDERA_ECDSA_DER_PREFIX)
        .filter(|rest| rest.len() == 64)
        .unwrap_or(&hex_str);

    let bytes = hex::decode(raw_hex)
        .map_err(|e| SigningError::InvalidPrivateKey(format!("invalid hex: {e}")))?;

    if bytes.len() == 32 {
        return SecretKey::from_slice(&bytes)
            .map_err(|e| SigningError::InvalidPrivateKey(format!("invalid scalar: {e}")));
    }
    parse_der(&bytes)
}

fn parse_pem(secret: &str) -> Result<SecretKey, SigningError> {
    let pem = pem::parse(secret)
        .map_err(|e| SigningError::InvalidPrivateKey(format!("invalid PEM: {e}")))?;
    parse_der(pem.contents())
}

fn parse_der(der: &[u8]) -> Result<SecretKey, SigningError> {
    SecretKey::from_pkcs8_der(der)
        .or_else(|_| SecretKey::from_sec1_der(der))
        .map_err(|e| SigningError::InvalidPrivateKey(format!("invalid key format: {e}")))
}
