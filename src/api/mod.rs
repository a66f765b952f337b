// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{error::ApiError, rate_limit::rate_limiter_middleware, state::AppState};

pub mod health;
pub mod session;
pub mod wallet;

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/auth/session-password",
            get(session::session_password_status)
                .post(session::set_session_password)
                .delete(session::clear_session_password),
        )
        .route("/auth/reset", post(session::reset_password))
        .route("/wallet/create", post(wallet::create_wallet))
        .route("/wallet/key", get(wallet::get_key_info))
        .route("/wallet/backup/recover", post(wallet::recover_from_backup))
        .route("/wallet/backup/resync", post(wallet::resync_backup))
        .route("/wallet/sign", post(wallet::sign_transaction));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limiter_middleware))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Run PBKDF2 and redb work off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "Blocking task failed");
        ApiError::internal("Internal error")
    })
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        session::set_session_password,
        session::session_password_status,
        session::clear_session_password,
        session::reset_password,
        wallet::create_wallet,
        wallet::get_key_info,
        wallet::recover_from_backup,
        wallet::resync_backup,
        wallet::sign_transaction
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            session::SetSessionPasswordRequest,
            session::ResetPasswordRequest,
            session::ResetPasswordResponse,
            wallet::CreateWalletRequest,
            wallet::CreateWalletResponse,
            wallet::KeyInfoResponse,
            wallet::BackupResponse,
            wallet::SignRequest,
            crate::session::SessionStatus,
            crate::session::PasswordRule,
            crate::signing::SignedTransaction,
            crate::storage::StoreOutcome,
            crate::storage::StoredKeyInfo,
            crate::storage::StoreKind,
            crate::rate_limit::LimitType
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Session", description = "Session password cache and key password reset"),
        (name = "Wallet", description = "Encrypted key storage and signing")
    )
)]
struct ApiDoc;
