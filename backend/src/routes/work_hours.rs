//! Work-hour logging: dashboard, entry CRUD and statistics.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, patch},
    Json, Router,
};
use chrono::NaiveDate;
use mesai_common::{
    aggregate, Profile, Stats, WorkHourEdit, WorkHourEntry, WorkHourForm, DEFAULT_HOURS,
    HOUR_STEP, QUICK_HOURS,
};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{current_identity, require_session};
use crate::error::{Error, Result};
use crate::provider::tables;
use crate::AppState;

/// Initial values of the entry form.
#[derive(Debug, Serialize)]
pub struct FormDefaults {
    pub date: NaiveDate,
    pub hours: u32,
    pub quick_hours: [u32; 3],
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub step: Decimal,
}

impl FormDefaults {
    fn for_day(date: NaiveDate) -> Self {
        Self {
            date,
            hours: DEFAULT_HOURS,
            quick_hours: QUICK_HOURS,
            step: HOUR_STEP,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub profile: Option<Profile>,
    pub entries: Vec<WorkHourEntry>,
    pub stats: Stats,
    pub form: FormDefaults,
}

/// GET /dashboard
async fn dashboard(State(state): State<Arc<AppState>>) -> Result<Json<DashboardView>> {
    let snapshot = state.session.snapshot().await;
    let identity = snapshot.identity.ok_or(Error::Unauthenticated)?;

    let entries = tables::list_work_hours(state.provider.as_ref(), &identity.id).await?;
    let stats = aggregate(&entries, &state.now());

    Ok(Json(DashboardView {
        profile: snapshot.profile,
        entries,
        stats,
        form: FormDefaults::for_day(state.today()),
    }))
}

/// GET /work-hours
async fn list_entries(State(state): State<Arc<AppState>>) -> Result<Json<Vec<WorkHourEntry>>> {
    let identity = current_identity(&state).await?;
    let entries = tables::list_work_hours(state.provider.as_ref(), &identity.id).await?;
    Ok(Json(entries))
}

/// POST /work-hours
async fn create_entry(
    State(state): State<Arc<AppState>>,
    Json(form): Json<WorkHourForm>,
) -> Result<(StatusCode, Json<WorkHourEntry>)> {
    let identity = current_identity(&state).await?;
    let entry = form.into_entry(&identity.id, state.today())?;

    let created = tables::insert_work_hour(state.provider.as_ref(), &entry).await?;
    tracing::info!(
        user_id = %identity.id,
        date = %created.date,
        hours = %created.hours,
        "Work hours logged"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /work-hours/:id
async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(edit): Json<WorkHourEdit>,
) -> Result<Json<WorkHourEntry>> {
    current_identity(&state).await?;
    let patch = edit.into_patch()?;

    let updated = tables::update_work_hour(state.provider.as_ref(), &id, &patch)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work hour entry {}", id)))?;

    Ok(Json(updated))
}

/// DELETE /work-hours/:id
async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    current_identity(&state).await?;

    if !tables::delete_work_hour(state.provider.as_ref(), &id).await? {
        return Err(Error::NotFound(format!("work hour entry {}", id)));
    }

    tracing::info!("Deleted work hour entry {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /stats
async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Stats>> {
    let identity = current_identity(&state).await?;
    let entries = tables::list_work_hours(state.provider.as_ref(), &identity.id).await?;
    Ok(Json(aggregate(&entries, &state.now())))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/work-hours", get(list_entries).post(create_entry))
        .route("/work-hours/:id", patch(update_entry).delete(delete_entry))
        .route("/stats", get(stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state)
}
