//! Route guard state machine.
//!
//! The phase is derived purely from a session snapshot each time a guarded
//! surface is requested. Guards map the phase to a decision.

use serde::Serialize;

use crate::profile::{Identity, Profile};

/// Unauthenticated landing surface (login).
pub const LOGIN_PATH: &str = "/";

/// Non-privileged landing surface for signed-in users.
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Point-in-time copy of the session resolver state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_loading: bool,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session_loading: true,
            identity: None,
            profile: None,
        }
    }
}

impl SessionSnapshot {
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_snapshot(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Anonymous,
    AuthenticatedNonAdmin,
    AuthenticatedAdmin,
}

impl SessionPhase {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        if snapshot.session_loading {
            return SessionPhase::Loading;
        }
        if snapshot.identity.is_none() {
            return SessionPhase::Anonymous;
        }
        // A session without a resolvable profile is a plain user.
        match &snapshot.profile {
            Some(profile) if profile.is_master => SessionPhase::AuthenticatedAdmin,
            _ => SessionPhase::AuthenticatedNonAdmin,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            SessionPhase::AuthenticatedNonAdmin | SessionPhase::AuthenticatedAdmin
        )
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled yet; show a neutral loading state.
    Loading,
    Redirect(&'static str),
    Admit,
}

/// Guard for privilege-gated surfaces.
pub fn admin_guard(phase: SessionPhase) -> GuardDecision {
    match phase {
        SessionPhase::Loading => GuardDecision::Loading,
        SessionPhase::AuthenticatedAdmin => GuardDecision::Admit,
        SessionPhase::Anonymous | SessionPhase::AuthenticatedNonAdmin => {
            GuardDecision::Redirect(DASHBOARD_PATH)
        }
    }
}

/// Guard for surfaces that only need a signed-in identity.
pub fn authenticated_guard(phase: SessionPhase) -> GuardDecision {
    match phase {
        SessionPhase::Loading => GuardDecision::Loading,
        SessionPhase::Anonymous => GuardDecision::Redirect(LOGIN_PATH),
        SessionPhase::AuthenticatedNonAdmin | SessionPhase::AuthenticatedAdmin => {
            GuardDecision::Admit
        }
    }
}

/// Guard for the login and registration surfaces.
pub fn guest_guard(phase: SessionPhase) -> GuardDecision {
    match phase {
        SessionPhase::Loading => GuardDecision::Loading,
        SessionPhase::Anonymous => GuardDecision::Admit,
        SessionPhase::AuthenticatedNonAdmin | SessionPhase::AuthenticatedAdmin => {
            GuardDecision::Redirect(DASHBOARD_PATH)
        }
    }
}
