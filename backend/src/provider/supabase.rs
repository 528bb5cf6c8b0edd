//! Supabase-style provider client (GoTrue auth + PostgREST record store).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use mesai_common::Identity;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};

use super::{
    AuthEvent, AuthEventKind, Provider, ProviderError, Result, Select, Session, SignUpResponse,
    AUTH_EVENT_CAPACITY,
};
use crate::config::ProviderConfig;

/// Client for a hosted Supabase project.
///
/// Holds the signed-in session (optionally persisted to disk) and
/// broadcasts an `AuthEvent` whenever it changes.
pub struct SupabaseClient {
    http_client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: Option<String>,
    session_file: Option<PathBuf>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

/// GoTrue token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Error body shapes of GoTrue and PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

async fn api_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();

    let code = parsed
        .error_code
        .clone()
        .or_else(|| parsed.error.clone())
        .or_else(|| match &parsed.code {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            _ => None,
        });

    let message = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });

    ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    Ok(response)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn invalid(e: serde_json::Error) -> ProviderError {
    ProviderError::InvalidResponse(e.to_string())
}

/// Sign-up answers with a full token response when the account is
/// confirmed immediately, otherwise with the bare user object.
fn parse_sign_up(body: serde_json::Value) -> Result<SignUpResponse> {
    if body.get("access_token").is_some() {
        let session = serde_json::from_value::<TokenResponse>(body)
            .map_err(invalid)?
            .into_session();
        return Ok(SignUpResponse {
            user: Some(session.user.clone()),
            session: Some(session),
        });
    }

    let user_value = if body.get("user").is_some_and(|u| !u.is_null()) {
        body["user"].clone()
    } else {
        body
    };

    let user = if user_value.get("id").is_some() {
        Some(serde_json::from_value::<Identity>(user_value).map_err(invalid)?)
    } else {
        None
    };

    Ok(SignUpResponse {
        user,
        session: None,
    })
}

fn load_session(path: &Path) -> Option<Session> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Session>(&contents) {
            Ok(session) => {
                tracing::info!("Restored session for {} from {}", session.user.id, path.display());
                Some(session)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to read session file {}: {}", path.display(), e);
            None
        }
    }
}

impl SupabaseClient {
    pub fn new(config: &ProviderConfig) -> Self {
        let session_file = config.session_file.as_ref().map(PathBuf::from);
        let session = session_file.as_deref().and_then(load_session);
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Self {
            http_client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
            session_file,
            session: RwLock::new(session),
            events,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// `{url}/auth/v1/admin/users/{id}` with the id as a single encoded segment.
    fn admin_user_url(&self, user_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.auth_url("admin/users"))
            .map_err(|e| ProviderError::Network(format!("Invalid provider URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Network("Provider URL cannot hold a path".to_string()))?
            .push(user_id);
        Ok(url)
    }

    fn rest(&self, method: Method, table: &str, token: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    /// Replace the local session, persist it and notify subscribers.
    async fn set_session(&self, session: Option<Session>, kind: AuthEventKind) {
        {
            let mut current = self.session.write().await;
            *current = session.clone();
        }
        self.persist(session.as_ref());

        // No subscribers is not an error.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    fn persist(&self, session: Option<&Session>) {
        let Some(path) = &self.session_file else {
            return;
        };

        let result = match session {
            Some(session) => {
                if let Some(parent) = path.parent() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!("Failed to create {}: {}", parent.display(), e);
                    }
                }
                serde_json::to_vec(session)
                    .map_err(std::io::Error::other)
                    .and_then(|bytes| std::fs::write(path, bytes))
            }
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };

        if let Err(e) = result {
            tracing::warn!("Failed to persist session to {}: {}", path.display(), e);
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        let response = send(
            self.http_client
                .post(self.auth_url("token"))
                .query(&[("grant_type", "refresh_token")])
                .header("apikey", &self.anon_key)
                .json(&json!({ "refresh_token": refresh_token })),
        )
        .await?;

        let token: TokenResponse = read_json(response).await?;
        Ok(token.into_session())
    }

    /// Access token of the current session, or the anon key when signed out.
    async fn bearer(&self) -> Result<String> {
        Ok(match self.get_session().await? {
            Some(session) => session.access_token,
            None => self.anon_key.clone(),
        })
    }
}

#[async_trait]
impl Provider for SupabaseClient {
    async fn get_session(&self) -> Result<Option<Session>> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };

        if !session.is_expired(Utc::now().timestamp()) {
            return Ok(Some(session));
        }

        tracing::debug!("Session for {} expired, refreshing", session.user.id);
        match self.refresh(&session.refresh_token).await {
            Ok(refreshed) => {
                self.set_session(Some(refreshed.clone()), AuthEventKind::TokenRefreshed)
                    .await;
                Ok(Some(refreshed))
            }
            // Keep the session on transport failures, the refresh can be retried.
            Err(ProviderError::Network(e)) => Err(ProviderError::Network(e)),
            Err(e) => {
                tracing::warn!("Session refresh rejected, signing out: {}", e);
                self.set_session(None, AuthEventKind::SignedOut).await;
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let response = send(
            self.http_client
                .post(self.auth_url("token"))
                .query(&[("grant_type", "password")])
                .header("apikey", &self.anon_key)
                .json(&json!({ "email": email, "password": password })),
        )
        .await?;

        let session = read_json::<TokenResponse>(response).await?.into_session();
        tracing::info!("Signed in as {}", session.user.id);
        self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
            .await;
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpResponse> {
        let response = send(
            self.http_client
                .post(self.auth_url("signup"))
                .header("apikey", &self.anon_key)
                .json(&json!({ "email": email, "password": password })),
        )
        .await?;

        let outcome = parse_sign_up(read_json(response).await?)?;
        if let Some(session) = &outcome.session {
            self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
                .await;
        }
        Ok(outcome)
    }

    async fn sign_out(&self) -> Result<()> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        let result = match token {
            Some(token) => send(
                self.http_client
                    .post(self.auth_url("logout"))
                    .header("apikey", &self.anon_key)
                    .bearer_auth(token),
            )
            .await
            .map(|_| ()),
            None => Ok(()),
        };

        self.set_session(None, AuthEventKind::SignedOut).await;
        result
    }

    async fn select(&self, query: &Select) -> Result<Vec<serde_json::Value>> {
        let token = self.bearer().await?;

        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        for (column, value) in &query.filters {
            params.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(order) = &query.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        let response = send(self.rest(Method::GET, &query.table, &token).query(&params)).await?;
        read_json(response).await
    }

    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<serde_json::Value> {
        let token = self.bearer().await?;
        let response = send(
            self.rest(Method::POST, table, &token)
                .header("Prefer", "return=representation")
                .json(&row),
        )
        .await?;

        let rows: Vec<serde_json::Value> = read_json(response).await?;
        rows.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse(format!("insert into {} returned no rows", table))
        })
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let token = self.bearer().await?;
        let response = send(
            self.rest(Method::PATCH, table, &token)
                .query(&[("id", format!("eq.{}", id))])
                .header("Prefer", "return=representation")
                .json(&patch),
        )
        .await?;

        let rows: Vec<serde_json::Value> = read_json(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let token = self.bearer().await?;
        let response = send(
            self.rest(Method::DELETE, table, &token)
                .query(&[("id", format!("eq.{}", id))])
                .header("Prefer", "return=representation"),
        )
        .await?;

        let rows: Vec<serde_json::Value> = read_json(response).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_account(&self, user_id: &str) -> Result<()> {
        let key = self
            .service_role_key
            .as_deref()
            .ok_or(ProviderError::MissingServiceKey)?;

        send(
            self.http_client
                .delete(self.admin_user_url(user_id)?)
                .header("apikey", key)
                .bearer_auth(key),
        )
        .await?;

        tracing::info!("Deleted account {}", user_id);
        Ok(())
    }
}
