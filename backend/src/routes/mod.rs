//! HTTP routes and the route guards in front of them.

pub mod admin;
pub mod auth;
pub mod health;
pub mod work_hours;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json, Router,
};
use mesai_common::{GuardDecision, Identity, SessionPhase};
use serde_json::json;

use crate::error::{Error, Result};
use crate::AppState;

/// Shown while the session is still being resolved.
pub const LOADING_MESSAGE: &str = "Yükleniyor...";

/// Assemble every route group.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(auth::router(state.clone()))
        .merge(work_hours::router(state.clone()))
        .nest("/admin", admin::router(state))
}

async fn enforce(
    guard: fn(SessionPhase) -> GuardDecision,
    state: &AppState,
    request: Request,
    next: Next,
) -> Response {
    let phase = state.session.snapshot().await.phase();

    match guard(phase) {
        GuardDecision::Admit => next.run(request).await,
        GuardDecision::Loading => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "loading",
                "message": LOADING_MESSAGE
            })),
        )
            .into_response(),
        GuardDecision::Redirect(location) => {
            tracing::debug!(
                path = %request.uri().path(),
                phase = ?phase,
                location,
                "Guard redirect"
            );
            Redirect::to(location).into_response()
        }
    }
}

/// Middleware for surfaces that need a signed-in identity.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(mesai_common::authenticated_guard, &state, request, next).await
}

/// Middleware for privilege-gated surfaces.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(mesai_common::admin_guard, &state, request, next).await
}

/// Middleware for the login and registration surfaces.
pub async fn require_guest(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(mesai_common::guest_guard, &state, request, next).await
}

/// Identity of the signed-in user.
///
/// Guards admit on the same snapshot, but a sign-out can land between the
/// guard and the handler.
pub(crate) async fn current_identity(state: &AppState) -> Result<Identity> {
    state
        .session
        .snapshot()
        .await
        .identity
        .ok_or(Error::Unauthenticated)
}
