//! Identity and profile types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated principal as known to the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque provider user id.
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Application profile row (`profiles` table), one per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    /// Administrative flag. Never written by this application.
    #[serde(default)]
    pub is_master: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a profile.
///
/// `is_master` is deliberately absent so the store default (`false`) applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
}
