//! Admin routes.
//!
//! Provides:
//! - User list, newest first (`/admin/users`)
//! - Account deletion (`/admin/users/:id`); master accounts are protected

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get},
    Json, Router,
};
use mesai_common::Profile;
use serde::Serialize;

use super::{current_identity, require_admin};
use crate::error::{Error, Result};
use crate::provider::{tables, ProviderError};
use crate::AppState;

/// Response for /admin/users endpoint.
#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<Profile>,
    pub total: usize,
}

/// GET /admin/users - List all profiles
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<UsersResponse>> {
    let users = tables::list_profiles(state.provider.as_ref()).await?;
    let total = users.len();
    Ok(Json(UsersResponse { users, total }))
}

/// DELETE /admin/users/:id - Delete an account and, by cascade, its data
async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let admin = current_identity(&state).await?;

    // The protection check and the deletion must address the same account.
    if !is_single_segment(&id) {
        return Err(Error::NotFound(format!("user {}", id)));
    }

    // An account without a profile can still be deleted.
    if let Some(profile) = tables::find_profile(state.provider.as_ref(), &id).await? {
        if profile.is_master {
            tracing::warn!("Admin {} tried to delete master account {}", admin.id, id);
            return Err(Error::Forbidden(
                "Yönetici hesapları silinemez".to_string(),
            ));
        }
    }

    state
        .provider
        .delete_account(&id)
        .await
        .map_err(|e| match e {
            ProviderError::Api { status: 404, .. } => Error::NotFound(format!("user {}", id)),
            other => Error::Provider(other),
        })?;

    tracing::info!("Admin {} deleted account {}", admin.id, id);
    Ok(StatusCode::NO_CONTENT)
}

/// Whether `id` can only ever name one path segment.
fn is_single_segment(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", delete(delete_user))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}
