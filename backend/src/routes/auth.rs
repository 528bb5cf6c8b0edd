//! Session, sign-in/up/out and the guest landing surfaces.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use mesai_common::{Identity, Profile, SessionPhase, SessionSnapshot, ValidationError};
use serde::{Deserialize, Serialize};

use super::require_guest;
use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Public view of the session state.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

impl From<SessionSnapshot> for SessionView {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            phase: snapshot.phase(),
            identity: snapshot.identity,
            profile: snapshot.profile,
        }
    }
}

#[derive(Debug, Serialize)]
struct Action {
    name: &'static str,
    method: &'static str,
    path: &'static str,
}

/// Descriptor of a landing surface and what can be done from it.
#[derive(Debug, Serialize)]
struct Landing {
    surface: &'static str,
    actions: Vec<Action>,
}

fn require(value: &str, field: &'static str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// GET /session
async fn session(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(state.session.snapshot().await.into())
}

/// GET /
async fn login_page() -> Json<Landing> {
    Json(Landing {
        surface: "login",
        actions: vec![
            Action {
                name: "sign_in",
                method: "POST",
                path: "/auth/sign-in",
            },
            Action {
                name: "register",
                method: "GET",
                path: "/register",
            },
        ],
    })
}

/// GET /register
async fn register_page() -> Json<Landing> {
    Json(Landing {
        surface: "register",
        actions: vec![
            Action {
                name: "sign_up",
                method: "POST",
                path: "/auth/sign-up",
            },
            Action {
                name: "login",
                method: "GET",
                path: mesai_common::LOGIN_PATH,
            },
        ],
    })
}

/// POST /auth/sign-in
async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SessionView>> {
    require(&request.email, "email")?;
    require(&request.password, "password")?;

    state
        .session
        .sign_in(request.email.trim(), &request.password)
        .await
        .map_err(Error::from_sign_in)?;

    Ok(Json(state.session.snapshot().await.into()))
}

/// POST /auth/sign-up
async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SessionView>)> {
    require(&request.email, "email")?;
    require(&request.password, "password")?;
    require(&request.full_name, "full_name")?;

    state
        .session
        .sign_up(
            request.email.trim(),
            &request.password,
            request.full_name.trim(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(state.session.snapshot().await.into())))
}

/// POST /auth/sign-out
async fn sign_out(State(state): State<Arc<AppState>>) -> StatusCode {
    state.session.sign_out().await;
    StatusCode::NO_CONTENT
}

pub fn router(state: Arc<AppState>) -> Router {
    let landing = Router::new()
        .route("/", get(login_page))
        .route("/register", get(register_page))
        .layer(middleware::from_fn_with_state(state.clone(), require_guest));

    let auth = Router::new()
        .route("/session", get(session))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-out", post(sign_out))
        .with_state(state);

    landing.merge(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_blank() {
        assert_eq!(require("  ", "email"), Err(ValidationError::MissingField("email")));
        assert!(require("ayse@example.com", "email").is_ok());
    }

    #[test]
    fn test_session_view_from_snapshot() {
        let view = SessionView::from(SessionSnapshot {
            session_loading: false,
            identity: None,
            profile: None,
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["phase"], "anonymous");
        assert!(json["identity"].is_null());
    }
}
