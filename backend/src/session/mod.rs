//! Session & role resolver.
//!
//! Tracks the current identity and its profile, reacting to provider
//! session-change notifications. Guards read a snapshot of this state on
//! every request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use mesai_common::{Identity, NewProfile, Profile, SessionSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::provider::{tables, AuthEvent, Provider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum SignUpError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Provider did not return a user for the new account")]
    UserNotCreated,

    /// Account exists at the provider but its profile row could not be written.
    #[error("Account {user_id} created but profile insert failed: {source}")]
    PartialInconsistency {
        user_id: String,
        source: ProviderError,
        rolled_back: bool,
    },
}

pub struct SessionResolver {
    provider: Arc<dyn Provider>,
    state: RwLock<SessionSnapshot>,
    /// Stamp of the most recently issued profile lookup.
    lookup_seq: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    rollback_orphaned_accounts: bool,
}

impl SessionResolver {
    pub fn new(provider: Arc<dyn Provider>, rollback_orphaned_accounts: bool) -> Self {
        Self {
            provider,
            state: RwLock::new(SessionSnapshot::default()),
            lookup_seq: AtomicU64::new(0),
            listener: Mutex::new(None),
            rollback_orphaned_accounts,
        }
    }

    /// Subscribe to session changes and resolve the initial session in the
    /// background. Guards answer "loading" until the latter settles.
    pub fn start(self: &Arc<Self>) {
        self.spawn_listener();

        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            resolver.initialize().await;
        });
    }

    /// Resolve the current session and its profile.
    pub async fn initialize(&self) {
        self.state.write().await.session_loading = true;

        let identity = match self.provider.get_session().await {
            Ok(session) => session.map(|s| s.user),
            Err(e) => {
                tracing::error!("Failed to load session: {}", e);
                None
            }
        };

        match &identity {
            Some(identity) => tracing::info!("Resumed session for {}", identity.id),
            None => tracing::info!("No active session"),
        }

        self.apply(identity).await;
    }

    pub fn spawn_listener(self: &Arc<Self>) {
        let mut events = self.provider.subscribe();
        let resolver: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(resolver) = resolver.upgrade() else {
                            break;
                        };
                        resolver.handle_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Session listener lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Session event channel closed");
                        break;
                    }
                }
            }
        });

        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Apply a session-change notification. The profile lookup runs in its
    /// own task and is not awaited.
    pub async fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        tracing::debug!("Session event: {:?}", event.kind);

        let identity = event.session.map(|s| s.user);
        let seq = self.next_seq();
        {
            let mut state = self.state.write().await;
            let same_user = state.identity.as_ref().map(|i| &i.id)
                == identity.as_ref().map(|i| &i.id);
            if !same_user {
                state.profile = None;
            }
            state.identity = identity.clone();
            state.session_loading = false;
        }

        if let Some(identity) = identity {
            let resolver = Arc::clone(self);
            tokio::spawn(async move {
                resolver.resolve_profile(seq, &identity.id).await;
            });
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), ProviderError> {
        let session = self.provider.sign_in_with_password(email, password).await?;
        self.apply(Some(session.user)).await;
        Ok(())
    }

    /// Create an account and make sure exactly one profile exists for it.
    ///
    /// Calling this again for an account that already has a profile skips
    /// the insert and succeeds.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), SignUpError> {
        let response = self.provider.sign_up(email, password).await?;
        let user = response.user.ok_or(SignUpError::UserNotCreated)?;

        let existing = match tables::find_profile(self.provider.as_ref(), &user.id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Profile check for {} failed, attempting insert: {}", user.id, e);
                None
            }
        };

        if existing.is_some() {
            tracing::info!("Profile for {} already exists, skipping insert", user.id);
        } else {
            let profile = NewProfile {
                id: user.id.clone(),
                email: user.email.clone().unwrap_or_else(|| email.to_string()),
                full_name: full_name.to_string(),
            };

            if let Err(source) = tables::insert_profile(self.provider.as_ref(), &profile).await {
                tracing::error!("Profile insert for new account {} failed: {}", user.id, source);
                let rolled_back = self.rollback_account(&user.id).await;
                return Err(SignUpError::PartialInconsistency {
                    user_id: user.id,
                    source,
                    rolled_back,
                });
            }
            tracing::info!("Created profile for {}", user.id);
        }

        if response.session.is_some() {
            self.apply(Some(user)).await;
        }
        Ok(())
    }

    /// Best-effort provider sign-out; local state is always cleared.
    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            tracing::warn!("Provider sign-out failed: {}", e);
        }

        self.next_seq();
        let mut state = self.state.write().await;
        state.identity = None;
        state.profile = None;
        state.session_loading = false;
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }

    pub fn shutdown(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Session listener stopped");
        }
    }

    fn next_seq(&self) -> u64 {
        self.lookup_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, seq: u64) -> bool {
        self.lookup_seq.load(Ordering::SeqCst) == seq
    }

    /// Set identity and its profile, awaiting the lookup.
    async fn apply(&self, identity: Option<Identity>) {
        let seq = self.next_seq();
        let profile = match &identity {
            Some(identity) => self.lookup_profile(&identity.id).await,
            None => None,
        };

        let mut state = self.state.write().await;
        if self.is_current(seq) {
            state.identity = identity;
            state.profile = profile;
        }
        state.session_loading = false;
    }

    async fn resolve_profile(&self, seq: u64, user_id: &str) {
        let profile = self.lookup_profile(user_id).await;

        let mut state = self.state.write().await;
        if !self.is_current(seq) {
            tracing::debug!("Discarding stale profile lookup for {}", user_id);
            return;
        }
        state.profile = profile;
    }

    async fn lookup_profile(&self, user_id: &str) -> Option<Profile> {
        match tables::find_profile(self.provider.as_ref(), user_id).await {
            Ok(profile) => {
                if profile.is_none() {
                    tracing::warn!("No profile found for {}", user_id);
                }
                profile
            }
            Err(e) => {
                tracing::error!("Profile lookup for {} failed: {}", user_id, e);
                None
            }
        }
    }

    async fn rollback_account(&self, user_id: &str) -> bool {
        if !self.rollback_orphaned_accounts {
            return false;
        }
        match self.provider.delete_account(user_id).await {
            Ok(()) => {
                tracing::warn!("Rolled back orphaned account {}", user_id);
                true
            }
            Err(e) => {
                tracing::error!("Rollback of orphaned account {} failed: {}", user_id, e);
                false
            }
        }
    }
}

impl Drop for SessionResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mesai_common::SessionPhase;

    use crate::provider::{tables::PROFILES, AuthEventKind, Session};
    use crate::test_util::{MemoryProvider, Operation};

    fn resolver(provider: &Arc<MemoryProvider>) -> Arc<SessionResolver> {
        Arc::new(SessionResolver::new(provider.clone(), false))
    }

    fn session_for(id: &str) -> Session {
        Session {
            access_token: format!("token-{}", id),
            refresh_token: format!("refresh-{}", id),
            expires_at: None,
            user: Identity {
                id: id.to_string(),
                email: None,
            },
        }
    }

    async fn wait_for<F>(resolver: &SessionResolver, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        for _ in 0..100 {
            let snapshot = resolver.snapshot().await;
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        resolver.snapshot().await
    }

    #[tokio::test]
    async fn test_starts_loading() {
        let provider = Arc::new(MemoryProvider::new());
        let resolver = resolver(&provider);
        assert_eq!(resolver.snapshot().await.phase(), SessionPhase::Loading);
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let provider = Arc::new(MemoryProvider::new());
        let resolver = resolver(&provider);

        resolver.initialize().await;

        let snapshot = resolver.snapshot().await;
        assert!(!snapshot.session_loading);
        assert!(snapshot.identity.is_none());
        assert_eq!(snapshot.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn test_initialize_resumes_admin_session() {
        let provider = Arc::new(MemoryProvider::new());
        let id = provider.add_user("admin@example.com", "secret", "Admin", true);
        provider.restore_session(&id);
        let resolver = resolver(&provider);

        resolver.initialize().await;

        let snapshot = resolver.snapshot().await;
        assert_eq!(snapshot.identity.as_ref().map(|i| i.id.as_str()), Some(id.as_str()));
        assert_eq!(snapshot.phase(), SessionPhase::AuthenticatedAdmin);
    }

    #[tokio::test]
    async fn test_initialize_session_error_is_anonymous() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail(
            Operation::GetSession,
            ProviderError::Network("connection refused".to_string()),
        );
        let resolver = resolver(&provider);

        resolver.initialize().await;

        assert_eq!(resolver.snapshot().await.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn test_profile_lookup_error_resolves_to_non_admin() {
        let provider = Arc::new(MemoryProvider::new());
        let id = provider.add_user("admin@example.com", "secret", "Admin", true);
        provider.restore_session(&id);
        provider.fail(
            Operation::Select(PROFILES),
            ProviderError::Network("timeout".to_string()),
        );
        let resolver = resolver(&provider);

        resolver.initialize().await;

        let snapshot = resolver.snapshot().await;
        assert!(snapshot.identity.is_some());
        assert!(snapshot.profile.is_none());
        assert_eq!(snapshot.phase(), SessionPhase::AuthenticatedNonAdmin);
    }

    #[tokio::test]
    async fn test_sign_in_resolves_profile() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_user("ayse@example.com", "secret", "Ayşe", false);
        let resolver = resolver(&provider);
        resolver.initialize().await;

        resolver.sign_in("ayse@example.com", "secret").await.unwrap();

        let snapshot = resolver.snapshot().await;
        assert_eq!(snapshot.profile.map(|p| p.full_name), Some("Ayşe".to_string()));
    }

    #[tokio::test]
    async fn test_sign_in_error_is_returned_unmodified() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_user("ayse@example.com", "secret", "Ayşe", false);
        let resolver = resolver(&provider);
        resolver.initialize().await;

        let err = resolver.sign_in("ayse@example.com", "wrong").await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(resolver.snapshot().await.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn test_listener_applies_provider_events() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_user("admin@example.com", "secret", "Admin", true);
        let resolver = resolver(&provider);
        resolver.initialize().await;
        resolver.spawn_listener();

        // Sign in behind the resolver's back; only the notification reaches it.
        provider
            .sign_in_with_password("admin@example.com", "secret")
            .await
            .unwrap();

        let snapshot = wait_for(&resolver, |s| s.phase() == SessionPhase::AuthenticatedAdmin).await;
        assert_eq!(snapshot.phase(), SessionPhase::AuthenticatedAdmin);

        provider.sign_out().await.unwrap();

        let snapshot = wait_for(&resolver, |s| s.identity.is_none()).await;
        assert!(snapshot.profile.is_none());
        assert_eq!(snapshot.phase(), SessionPhase::Anonymous);

        resolver.shutdown();
    }

    #[tokio::test]
    async fn test_event_for_other_user_clears_profile_immediately() {
        let provider = Arc::new(MemoryProvider::new());
        let admin = provider.add_user("admin@example.com", "secret", "Admin", true);
        let other = provider.add_user("ali@example.com", "secret", "Ali", false);
        provider.restore_session(&admin);
        let resolver = resolver(&provider);
        resolver.initialize().await;
        assert_eq!(resolver.snapshot().await.phase(), SessionPhase::AuthenticatedAdmin);

        provider.set_select_delay(Some(Duration::from_millis(50)));
        resolver
            .handle_event(AuthEvent {
                kind: AuthEventKind::SignedIn,
                session: Some(session_for(&other)),
            })
            .await;

        // The admin profile must not leak onto the new identity.
        let snapshot = resolver.snapshot().await;
        assert_eq!(snapshot.identity.clone().map(|i| i.id), Some(other));
        assert!(snapshot.profile.is_none());
        assert_eq!(snapshot.phase(), SessionPhase::AuthenticatedNonAdmin);
    }

    #[tokio::test]
    async fn test_stale_lookup_is_discarded_after_sign_out() {
        let provider = Arc::new(MemoryProvider::new());
        let admin = provider.add_user("admin@example.com", "secret", "Admin", true);
        let resolver = resolver(&provider);
        resolver.initialize().await;

        provider.set_select_delay(Some(Duration::from_millis(50)));
        resolver
            .handle_event(AuthEvent {
                kind: AuthEventKind::SignedIn,
                session: Some(session_for(&admin)),
            })
            .await;
        resolver.sign_out().await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        let snapshot = resolver.snapshot().await;
        assert!(snapshot.identity.is_none());
        assert!(snapshot.profile.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_state_even_when_provider_fails() {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_user("ayse@example.com", "secret", "Ayşe", false);
        let resolver = resolver(&provider);
        resolver.initialize().await;
        resolver.sign_in("ayse@example.com", "secret").await.unwrap();
        provider.fail(
            Operation::SignOut,
            ProviderError::Network("connection reset".to_string()),
        );

        resolver.sign_out().await;

        let snapshot = resolver.snapshot().await;
        assert!(snapshot.identity.is_none());
        assert!(snapshot.profile.is_none());
    }

    #[tokio::test]
    async fn test_sign_up_creates_single_profile() {
        let provider = Arc::new(MemoryProvider::new());
        let resolver = resolver(&provider);
        resolver.initialize().await;

        resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet Demir")
            .await
            .unwrap();

        let profiles = provider.rows(PROFILES);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["full_name"], "Mehmet Demir");
        assert_eq!(profiles[0]["is_master"], false);
        assert_eq!(resolver.snapshot().await.phase(), SessionPhase::AuthenticatedNonAdmin);
    }

    #[tokio::test]
    async fn test_sign_up_twice_is_idempotent() {
        let provider = Arc::new(MemoryProvider::new());
        let resolver = resolver(&provider);

        resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet Demir")
            .await
            .unwrap();
        resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet Demir")
            .await
            .unwrap();

        assert_eq!(provider.rows(PROFILES).len(), 1);
    }

    #[tokio::test]
    async fn test_sign_up_profile_failure_is_partial_inconsistency() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail(
            Operation::Insert(PROFILES),
            ProviderError::Network("connection reset".to_string()),
        );
        let resolver = resolver(&provider);

        let err = resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet Demir")
            .await
            .unwrap_err();

        match err {
            SignUpError::PartialInconsistency {
                user_id,
                rolled_back,
                ..
            } => {
                assert!(!rolled_back);
                assert!(provider.has_account(&user_id));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sign_up_rollback_when_configured() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail(
            Operation::Insert(PROFILES),
            ProviderError::Network("connection reset".to_string()),
        );
        let resolver = SessionResolver::new(provider.clone(), true);

        let err = resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet Demir")
            .await
            .unwrap_err();

        match err {
            SignUpError::PartialInconsistency {
                user_id,
                rolled_back,
                ..
            } => {
                assert!(rolled_back);
                assert!(!provider.has_account(&user_id));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sign_up_without_user_is_rejected() {
        let provider = Arc::new(MemoryProvider::new());
        provider.withhold_sign_up_user(true);
        let resolver = resolver(&provider);

        let err = resolver
            .sign_up("mehmet@example.com", "secret", "Mehmet")
            .await
            .unwrap_err();

        assert!(matches!(err, SignUpError::UserNotCreated));
        assert!(provider.rows(PROFILES).is_empty());
    }
}
