//! In-memory `Provider` for tests.
//!
//! Accounts, the current session and table rows live behind one mutex.
//! `work_hours` rows are only visible to and writable by their owner,
//! the way the hosted store's row-level security behaves.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mesai_common::Identity;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::provider::tables::{PROFILES, WORK_HOURS};
use crate::provider::{
    AuthEvent, AuthEventKind, Provider, ProviderError, Result, Select, Session, SignUpResponse,
    AUTH_EVENT_CAPACITY,
};

/// Provider operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    SignIn,
    SignUp,
    SignOut,
    Select(&'static str),
    Insert(&'static str),
    Update(&'static str),
    Delete(&'static str),
    DeleteAccount,
}

#[derive(Debug, Clone)]
struct Account {
    id: String,
    email: String,
    password: String,
}

#[derive(Default)]
struct MemoryState {
    accounts: Vec<Account>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Value>>,
    failures: HashMap<Operation, ProviderError>,
    select_delay: Option<Duration>,
    withhold_sign_up_user: bool,
}

pub struct MemoryProvider {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn api_error(status: u16, code: &str, message: &str) -> ProviderError {
    ProviderError::Api {
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

fn session_for(account: &Account) -> Session {
    Session {
        access_token: format!("token-{}", account.id),
        refresh_token: format!("refresh-{}", account.id),
        expires_at: None,
        user: Identity {
            id: account.id.clone(),
            email: Some(account.email.clone()),
        },
    }
}

fn field_str(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn compare_column(a: &Value, b: &Value, column: &str) -> std::cmp::Ordering {
    match (a.get(column), b.get(column)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        _ => field_str(a, column).cmp(&field_str(b, column)),
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, operation: Operation) -> Result<()> {
        match self.lock().failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        let _ = self.events.send(AuthEvent { kind, session });
    }

    /// Register an account without a profile. Returns its id.
    pub fn add_account(&self, email: &str, password: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().accounts.push(Account {
            id: id.clone(),
            email: email.to_string(),
            password: password.to_string(),
        });
        id
    }

    pub fn add_profile(&self, id: &str, email: &str, full_name: &str, is_master: bool) {
        self.lock()
            .tables
            .entry(PROFILES.to_string())
            .or_default()
            .push(json!({
                "id": id,
                "created_at": Utc::now().to_rfc3339(),
                "email": email,
                "full_name": full_name,
                "is_master": is_master,
            }));
    }

    /// Register an account together with its profile. Returns its id.
    pub fn add_user(&self, email: &str, password: &str, full_name: &str, is_master: bool) -> String {
        let id = self.add_account(email, password);
        self.add_profile(&id, email, full_name, is_master);
        id
    }

    /// Insert a row as-is, bypassing ownership checks.
    pub fn seed_row(&self, table: &str, row: Value) {
        self.lock().tables.entry(table.to_string()).or_default().push(row);
    }

    /// Make a session current without emitting a notification, as if it
    /// had been restored from storage.
    pub fn restore_session(&self, user_id: &str) {
        let mut state = self.lock();
        let session = state
            .accounts
            .iter()
            .find(|a| a.id == user_id)
            .map(session_for);
        state.session = session;
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn has_account(&self, user_id: &str) -> bool {
        self.lock().accounts.iter().any(|a| a.id == user_id)
    }

    pub fn fail(&self, operation: Operation, error: ProviderError) {
        self.lock().failures.insert(operation, error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn set_select_delay(&self, delay: Option<Duration>) {
        self.lock().select_delay = delay;
    }

    /// Answer sign-up without a user object.
    pub fn withhold_sign_up_user(&self, withhold: bool) {
        self.lock().withhold_sign_up_user = withhold;
    }

    fn current_user(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.user.id.clone())
    }

    /// Whether the current session may touch `row` in `table`.
    fn visible(table: &str, row: &Value, user: Option<&str>) -> bool {
        if table != WORK_HOURS {
            return true;
        }
        match user {
            Some(user) => field_str(row, "user_id").as_deref() == Some(user),
            None => false,
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn get_session(&self) -> Result<Option<Session>> {
        self.check(Operation::GetSession)?;
        Ok(self.lock().session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.check(Operation::SignIn)?;

        let session = {
            let mut state = self.lock();
            let account = state
                .accounts
                .iter()
                .find(|a| a.email == email && a.password == password)
                .ok_or_else(|| api_error(400, "invalid_credentials", "Invalid login credentials"))?;
            let session = session_for(account);
            state.session = Some(session.clone());
            session
        };

        self.emit(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
        self.check(Operation::SignUp)?;

        let (response, created) = {
            let mut state = self.lock();
            if state.withhold_sign_up_user {
                return Ok(SignUpResponse {
                    user: None,
                    session: None,
                });
            }

            let existing = state.accounts.iter().find(|a| a.email == email).cloned();
            match existing {
                // Existing accounts get their user back but no session.
                Some(account) => (
                    SignUpResponse {
                        user: Some(session_for(&account).user),
                        session: None,
                    },
                    false,
                ),
                None => {
                    let account = Account {
                        id: uuid::Uuid::new_v4().to_string(),
                        email: email.to_string(),
                        password: password.to_string(),
                    };
                    let session = session_for(&account);
                    state.accounts.push(account);
                    state.session = Some(session.clone());
                    (
                        SignUpResponse {
                            user: Some(session.user.clone()),
                            session: Some(session),
                        },
                        true,
                    )
                }
            }
        };

        if created {
            self.emit(AuthEventKind::SignedIn, response.session.clone());
        }
        Ok(response)
    }

    async fn sign_out(&self) -> Result<()> {
        self.lock().session = None;
        self.emit(AuthEventKind::SignedOut, None);
        self.check(Operation::SignOut)
    }

    async fn select(&self, query: &Select) -> Result<Vec<Value>> {
        self.check(Operation::Select(table_key(&query.table)))?;

        let delay = self.lock().select_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let user = self.current_user();
        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| Self::visible(&query.table, row, user.as_deref()))
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(column, value)| field_str(row, column).as_deref() == Some(value))
            })
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_column(a, b, &order.column);
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.check(Operation::Insert(table_key(table)))?;

        let Value::Object(mut fields) = row else {
            return Err(api_error(400, "PGRST102", "Row must be a JSON object"));
        };
        fields
            .entry("id")
            .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        if table == PROFILES {
            fields.entry("is_master").or_insert(json!(false));
        }
        let row = Value::Object(fields);

        let user = self.current_user();
        if !Self::visible(table, &row, user.as_deref()) {
            return Err(api_error(
                403,
                "42501",
                "new row violates row-level security policy",
            ));
        }

        let mut state = self.lock();
        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| r.get("id") == row.get("id")) {
            return Err(api_error(
                409,
                "23505",
                "duplicate key value violates unique constraint",
            ));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        self.check(Operation::Update(table_key(table)))?;

        let user = self.current_user();
        let mut state = self.lock();
        let Some(row) = state.tables.get_mut(table).and_then(|rows| {
            rows.iter_mut().find(|r| {
                field_str(r, "id").as_deref() == Some(id)
                    && Self::visible(table, r, user.as_deref())
            })
        }) else {
            return Ok(None);
        };

        if let (Value::Object(fields), Value::Object(changes)) = (&mut *row, patch) {
            fields.extend(changes);
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        self.check(Operation::Delete(table_key(table)))?;

        let user = self.current_user();
        let mut state = self.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|r| {
            !(field_str(r, "id").as_deref() == Some(id)
                && Self::visible(table, r, user.as_deref()))
        });
        Ok(rows.len() < before)
    }

    async fn delete_account(&self, user_id: &str) -> Result<()> {
        self.check(Operation::DeleteAccount)?;

        let mut state = self.lock();
        let before = state.accounts.len();
        state.accounts.retain(|a| a.id != user_id);
        if state.accounts.len() == before {
            return Err(api_error(404, "user_not_found", "User not found"));
        }

        // Cascade to the rows owned by the account.
        if let Some(rows) = state.tables.get_mut(PROFILES) {
            rows.retain(|r| field_str(r, "id").as_deref() != Some(user_id));
        }
        if let Some(rows) = state.tables.get_mut(WORK_HOURS) {
            rows.retain(|r| field_str(r, "user_id").as_deref() != Some(user_id));
        }
        Ok(())
    }
}

/// Map a table name onto the static names failures are keyed by.
fn table_key(table: &str) -> &'static str {
    match table {
        PROFILES => PROFILES,
        WORK_HOURS => WORK_HOURS,
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_work_hours_are_scoped_to_session_user() {
        let provider = MemoryProvider::new();
        let ayse = provider.add_user("ayse@example.com", "secret", "Ayşe", false);
        let ali = provider.add_user("ali@example.com", "secret", "Ali", false);
        provider.seed_row(WORK_HOURS, json!({"id": "w1", "user_id": ayse, "date": "2024-01-10", "hours": 8.0}));
        provider.seed_row(WORK_HOURS, json!({"id": "w2", "user_id": ali, "date": "2024-01-10", "hours": 4.0}));

        provider.restore_session(&ayse);
        let rows = provider.select(&Select::from(WORK_HOURS)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "w1");

        // Someone else's row is invisible to update and delete.
        assert!(provider.update(WORK_HOURS, "w2", json!({"hours": 1.0})).await.unwrap().is_none());
        assert!(!provider.delete(WORK_HOURS, "w2").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_for_other_user_is_rejected() {
        let provider = MemoryProvider::new();
        let ayse = provider.add_user("ayse@example.com", "secret", "Ayşe", false);
        provider.restore_session(&ayse);

        let err = provider
            .insert(WORK_HOURS, json!({"user_id": "someone-else", "date": "2024-01-10", "hours": 8.0}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_select_orders_and_limits() {
        let provider = MemoryProvider::new();
        provider.seed_row(PROFILES, json!({"id": "a", "created_at": "2024-01-01T00:00:00Z"}));
        provider.seed_row(PROFILES, json!({"id": "b", "created_at": "2024-03-01T00:00:00Z"}));
        provider.seed_row(PROFILES, json!({"id": "c", "created_at": "2024-02-01T00:00:00Z"}));

        let rows = provider
            .select(&Select::from(PROFILES).order("created_at", false).limit(2))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_profile_insert_conflicts() {
        let provider = MemoryProvider::new();
        provider.add_profile("p1", "a@example.com", "A", false);

        let err = provider
            .insert(PROFILES, json!({"id": "p1", "email": "a@example.com", "full_name": "A"}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(409));
    }
}
