// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum middleware applying the rate limiter to `/api` routes.
//!
//! ```rust,ignore
//! Router::new()
//!     .nest("/api", api_routes)
//!     .layer(middleware::from_fn_with_state(state.clone(), rate_limiter_middleware))
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::config::limit_type_for_request;
use super::limiter::RateLimitResult;
use crate::auth::identity_from_parts;
use crate::monitoring::{SecurityEvent, SecurityEventType};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// `X-Request-ID` from the request, or a fresh UUID.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub async fn rate_limiter_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limit) = limit_type_for_request(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let identity = identity_from_parts(&parts, &state.auth_config);
    let request_id = request_id(&parts.headers);
    let request = Request::from_parts(parts, body);

    let result = match state.rate_limiter.check(&identity, limit).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(limit = %limit, error = %e, request_id = %request_id, "Rate limiter unavailable");
            state.monitor.record(
                SecurityEvent::new(SecurityEventType::RateLimitStoreFailure)
                    .with_ip(identity.ip.clone())
                    .with_request_id(request_id.clone())
                    .with_details(json!({ "type": limit, "error": e.to_string() })),
            );
            let body = json!({
                "error": "Service temporarily unavailable",
                "details": "Rate limiting is unavailable, please retry shortly",
            });
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            set_header(response.headers_mut(), REQUEST_ID_HEADER, &request_id);
            return response;
        }
    };

    if result.blocked {
        let retry_after = result.retry_after_secs(state.rate_limiter.now_ms());
        tracing::warn!(
            limit = %limit,
            request_id = %request_id,
            retry_after,
            "Rate limit exceeded"
        );

        let mut event = SecurityEvent::new(SecurityEventType::RateLimitExceeded)
            .with_ip(identity.ip.clone())
            .with_request_id(request_id.clone())
            .with_details(json!({ "type": limit, "retryAfter": retry_after }));
        if let Some(user) = &identity.user {
            event = event.with_user(user.clone());
        }
        state.monitor.record(event);

        let body = json!({
            "error": "Too many requests",
            "retryAfter": retry_after,
            "type": limit,
            "details": format!("Too many {limit} requests, retry in {retry_after} seconds"),
            "requestId": request_id,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        set_header(headers, "retry-after", &retry_after.to_string());
        set_limit_headers(headers, &result, &request_id);
        return response;
    }

    let mut response = next.run(request).await;
    set_limit_headers(response.headers_mut(), &result, &request_id);
    response
}

fn set_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult, request_id: &str) {
    set_header(headers, LIMIT_HEADER, &result.limit.to_string());
    set_header(headers, REMAINING_HEADER, &result.remaining.to_string());
    // Epoch seconds, as clients expect.
    set_header(headers, RESET_HEADER, &result.reset.div_ceil(1_000).to_string());
    set_header(headers, REQUEST_ID_HEADER, request_id);
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
