//! Hosted auth/data provider abstraction.
//!
//! This module defines the `Provider` trait: the operation contracts the
//! application relies on (session retrieval and change notifications,
//! credential sign-in, account creation, sign-out, a generic record store
//! and administrative account deletion). Transport and wire format live in
//! the concrete client.

mod supabase;
pub mod tables;

pub use supabase::SupabaseClient;

use async_trait::async_trait;
use mesai_common::Identity;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the session-change notification channel.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Errors returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Provider error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service role key not configured")]
    MissingServiceKey,
}

impl ProviderError {
    /// HTTP status reported by the provider, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A signed-in session as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Session-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    /// The new session, `None` after sign-out.
    pub session: Option<Session>,
}

/// Result of account creation.
///
/// `session` is present only when the provider signs the user in
/// immediately (no email confirmation step).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpResponse {
    pub user: Option<Identity>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select-by-equality query against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub filters: Vec<(String, String)>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Operation contracts of the hosted auth/data provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Current session, if any. May refresh an expired session.
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Subscribe to session-change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse>;

    /// Sign out remotely. The local session is dropped whatever the outcome.
    async fn sign_out(&self) -> Result<()>;

    async fn select(&self, query: &Select) -> Result<Vec<serde_json::Value>>;

    /// Insert one row, returning the stored representation.
    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<serde_json::Value>;

    /// Update the row with `id`. `None` when no row matched.
    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;

    /// Delete the row with `id`. Returns whether a row was removed.
    async fn delete(&self, table: &str, id: &str) -> Result<bool>;

    /// Administrative account deletion; the profile row cascades.
    async fn delete_account(&self, user_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<i64>) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            user: Identity {
                id: "user-1".to_string(),
                email: None,
            },
        }
    }

    #[test]
    fn test_session_expiry() {
        assert!(session(Some(100)).is_expired(100));
        assert!(session(Some(100)).is_expired(101));
        assert!(!session(Some(100)).is_expired(99));
        assert!(!session(None).is_expired(i64::MAX));
    }

    #[test]
    fn test_select_builder() {
        let query = Select::from("work_hours")
            .eq("user_id", "user-1")
            .order("date", false)
            .limit(10);

        assert_eq!(query.table, "work_hours");
        assert_eq!(query.filters, vec![("user_id".to_string(), "user-1".to_string())]);
        assert_eq!(
            query.order,
            Some(Order {
                column: "date".to_string(),
                ascending: false
            })
        );
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn test_provider_error_status() {
        let err = ProviderError::Api {
            status: 400,
            code: Some("invalid_grant".to_string()),
            message: "Invalid login credentials".to_string(),
        };
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "Provider error (400): Invalid login credentials");
        assert_eq!(ProviderError::Network("refused".to_string()).status(), None);
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let original = session(Some(1_700_000_000));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
