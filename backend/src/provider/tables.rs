//! Typed access to the `profiles` and `work_hours` tables.
//!
//! Rows cross the provider boundary as JSON and are decoded here; a row
//! that does not match the expected shape is an `InvalidResponse`.

use mesai_common::{NewProfile, NewWorkHourEntry, Profile, WorkHourEntry, WorkHourPatch};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Provider, ProviderError, Result, Select};

pub const PROFILES: &str = "profiles";
pub const WORK_HOURS: &str = "work_hours";

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(values: Vec<serde_json::Value>) -> Result<Vec<T>> {
    values.into_iter().map(decode).collect()
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Profile for `user_id`, `None` when no row exists.
pub async fn find_profile(provider: &dyn Provider, user_id: &str) -> Result<Option<Profile>> {
    let rows = provider
        .select(&Select::from(PROFILES).eq("id", user_id).limit(2))
        .await?;

    match rows.len() {
        0 => Ok(None),
        1 => rows.into_iter().next().map(decode).transpose(),
        n => Err(ProviderError::InvalidResponse(format!(
            "expected at most one profile for {}, got {}",
            user_id, n
        ))),
    }
}

pub async fn insert_profile(provider: &dyn Provider, profile: &NewProfile) -> Result<Profile> {
    let row = provider.insert(PROFILES, encode(profile)?).await?;
    decode(row)
}

/// All profiles, newest first.
pub async fn list_profiles(provider: &dyn Provider) -> Result<Vec<Profile>> {
    let rows = provider
        .select(&Select::from(PROFILES).order("created_at", false))
        .await?;
    decode_all(rows)
}

/// All entries of one user, most recent date first.
pub async fn list_work_hours(provider: &dyn Provider, user_id: &str) -> Result<Vec<WorkHourEntry>> {
    let rows = provider
        .select(
            &Select::from(WORK_HOURS)
                .eq("user_id", user_id)
                .order("date", false),
        )
        .await?;
    decode_all(rows)
}

pub async fn insert_work_hour(
    provider: &dyn Provider,
    entry: &NewWorkHourEntry,
) -> Result<WorkHourEntry> {
    let row = provider.insert(WORK_HOURS, encode(entry)?).await?;
    decode(row)
}

pub async fn update_work_hour(
    provider: &dyn Provider,
    id: &str,
    patch: &WorkHourPatch,
) -> Result<Option<WorkHourEntry>> {
    provider
        .update(WORK_HOURS, id, encode(patch)?)
        .await?
        .map(decode)
        .transpose()
}

pub async fn delete_work_hour(provider: &dyn Provider, id: &str) -> Result<bool> {
    provider.delete(WORK_HOURS, id).await
}
