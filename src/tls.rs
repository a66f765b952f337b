// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Optional HTTPS from a PEM certificate chain and private key.
//!
//! The ring crypto provider must be installed before
//! [`load_rustls_config`] is called.

use std::io;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsPaths;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to load TLS certificate {cert} / key {key}: {source}")]
    Load {
        cert: String,
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Build the rustls server config from the configured PEM files.
pub async fn load_rustls_config(paths: &TlsPaths) -> Result<RustlsConfig, TlsError> {
    RustlsConfig::from_pem_file(&paths.cert, &paths.key)
        .await
        .map_err(|source| TlsError::Load {
            cert: paths.cert.display().to_string(),
            key: paths.key.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_files_are_reported() {
        let paths = TlsPaths {
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
        };
        let err = load_rustls_config(&paths).await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }
}
