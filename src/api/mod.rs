use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::errors::AppError;
use crate::middleware::metrics::track_requests;
use crate::AppState;

pub mod rate_limiting;

/// Build the full application router: probes, Prometheus exposition and the
/// admin rate-limiting API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api/admin/rate-limiting", rate_limiting_router(state.clone()))
        .fallback(fallback_404)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Routes relative to `/api/admin/rate-limiting`, all behind admin auth.
pub fn rate_limiting_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics", get(rate_limiting::get_metrics))
        .route("/violations", get(rate_limiting::get_violations))
        .route("/usage", get(rate_limiting::get_usage))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

async fn fallback_404() -> Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "not found" })),
    )
        .into_response()
}

/// Middleware: requires an admin-role bearer token signed with the
/// configured secret. 401 for missing/invalid/expired, 403 for other roles.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let claims = auth::authorize_admin(provided, &state.config.jwt_secret).map_err(|e| {
        tracing::warn!(path = %req.uri().path(), "admin API: {}", e);
        e
    })?;

    tracing::debug!(sub = %claims.sub, "admin API: authorized");
    Ok(next.run(req).await)
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => "ok".into_response(),
        Err(e) => {
            tracing::warn!("readiness check failed: {:#}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.recorder.encode(),
    )
        .into_response()
}
