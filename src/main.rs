// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lynx_vault::{
    api::router,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    session::SessionReaper,
    state::AppState,
    tls::load_rustls_config,
};

/// In-flight requests get this long to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Subscriber first, so warnings from config loading are not lost.
    init_tracing(LogFormat::from_env());

    let config = AppConfig::from_env();

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let state = AppState::from_config(&config).expect("Failed to initialize vault state");
    if state.auth_config.is_development() {
        tracing::warn!("SUPABASE_JWT_SECRET not set: development mode, token signatures are NOT verified");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(SessionReaper::new(state.sessions.clone()).run(shutdown.clone()));

    let app = router(state);
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .expect("Failed to parse bind address");

    let handle: Handle<SocketAddr> = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone(), shutdown));

    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    match &config.tls {
        Some(paths) => {
            let tls_config = load_rustls_config(paths)
                .await
                .expect("Failed to load TLS certificate");
            tracing::info!(%addr, "LYNX vault listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(service)
                .await
                .expect("HTTPS server failed");
        }
        None => {
            tracing::warn!(%addr, "TLS not configured, LYNX vault listening on plain http (docs at /docs)");
            axum_server::bind(addr)
                .handle(handle)
                .serve(service)
                .await
                .expect("HTTP server failed");
        }
    }

    tracing::info!("LYNX vault stopped");
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal(handle: Handle<SocketAddr>, shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
