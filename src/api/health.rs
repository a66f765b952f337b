// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::run_blocking;
use crate::state::AppState;
use crate::storage::StoreKind;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// PRIMARY key store ("ok" or "unavailable").
    pub primary_store: String,
    /// BACKUP key store ("ok" or "unavailable").
    pub backup_store: String,
    /// Token verification mode ("production" or "development").
    pub auth_mode: String,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

async fn check_store(state: &AppState, kind: StoreKind) -> String {
    let keys = state.keys.clone();
    match run_blocking(move || keys.initialize_db(kind)).await {
        Ok(Ok(())) => "ok".to_string(),
        Ok(Err(e)) => {
            tracing::warn!(store = %kind, error = %e, "Key store health check failed");
            "unavailable".to_string()
        }
        Err(_) => "unavailable".to_string(),
    }
}

/// Health check endpoint handler.
///
/// Returns 200 when both key stores answer. A single failed store reports
/// "degraded" with 200 since reads fall back to the other; both failed is 503.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let primary_store = check_store(&state, StoreKind::Primary).await;
    let backup_store = check_store(&state, StoreKind::Backup).await;

    let primary_ok = primary_store == "ok";
    let backup_ok = backup_store == "ok";

    let auth_mode = if state.auth_config.is_development() {
        "development"
    } else {
        "production"
    };

    let response = ReadyResponse {
        status: if primary_ok && backup_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            primary_store,
            backup_store,
            auth_mode: auth_mode.to_string(),
        },
    };

    let status = if primary_ok || backup_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}
