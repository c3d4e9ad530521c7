//! Auth capability — the external session/profile service the app consumes.
//!
//! DESIGN
//! ======
//! [`AuthBackend`] is the seam between the lifecycle controller and whatever
//! hosts accounts. `rest` talks to a Supabase-compatible REST API;
//! [`OfflineAuthBackend`] stands in when nothing is configured. Tests script
//! their own implementation.
//!
//! Session changes are pushed through [`SessionSubscription`]s fed by a
//! [`SessionBroadcaster`]. Dropping or unsubscribing a subscription stops
//! delivery; closed subscribers are pruned on the next emit.

pub mod rest;


use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::identity::{ProfileRow, SessionSnapshot};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by auth backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The service could not be reached or is not configured.
    #[error("auth transport failed: {0}")]
    Transport(String),

    /// The service answered and refused the request.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The service answered with a body we could not read.
    #[error("auth response parse failed: {0}")]
    Parse(String),

    /// Local session persistence failed.
    #[error("session storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// Human-readable message for account flows, or `fallback` when the
    /// service gave nothing useful.
    #[must_use]
    pub fn message_or(&self, fallback: &str) -> String {
        match self {
            Self::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Transport(message) if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_owned(),
        }
    }
}

// =============================================================================
// SESSION CHANGES
// =============================================================================

/// Kind of a pushed session change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    InitialSession,
}

impl AuthChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::InitialSession => "INITIAL_SESSION",
        }
    }

    /// Whether this kind carries identity authority. `INITIAL_SESSION` does not.
    #[must_use]
    pub fn changes_session(self) -> bool {
        !matches!(self, Self::InitialSession)
    }
}

/// One pushed session change.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionChange {
    pub kind: AuthChangeKind,
    pub session: Option<SessionSnapshot>,
}

impl SessionChange {
    #[must_use]
    pub fn new(kind: AuthChangeKind, session: Option<SessionSnapshot>) -> Self {
        Self { kind, session }
    }

    #[must_use]
    pub fn signed_in(session: SessionSnapshot) -> Self {
        Self::new(AuthChangeKind::SignedIn, Some(session))
    }

    #[must_use]
    pub fn signed_out() -> Self {
        Self::new(AuthChangeKind::SignedOut, None)
    }

    #[must_use]
    pub fn initial(session: Option<SessionSnapshot>) -> Self {
        Self::new(AuthChangeKind::InitialSession, session)
    }
}

/// Receiving end of a session-change stream.
#[derive(Debug)]
pub struct SessionSubscription {
    rx: mpsc::UnboundedReceiver<SessionChange>,
}

impl SessionSubscription {
    /// Next change, or `None` once unsubscribed or the source is gone.
    pub async fn recv(&mut self) -> Option<SessionChange> {
        self.rx.recv().await
    }

    /// Stop delivery. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.rx.close();
    }
}

/// Fan-out of session changes to every live subscription.
#[derive(Debug, Default)]
pub struct SessionBroadcaster {
    senders: Mutex<Vec<mpsc::UnboundedSender<SessionChange>>>,
}

impl SessionBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription, optionally primed with a first change.
    pub fn subscribe(&self, initial: Option<SessionChange>) -> SessionSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let primed = match initial {
            Some(change) => tx.send(change).is_ok(),
            None => true,
        };
        if primed {
            self.lock().push(tx);
        }
        SessionSubscription { rx }
    }

    /// Deliver `change` to every live subscription.
    pub fn emit(&self, change: &SessionChange) {
        self.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Number of subscriptions that have not been closed.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SessionChange>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// AUTH BACKEND TRAIT
// =============================================================================

/// The external session/profile capability. Enables mocking in tests.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the service is unreachable or misconfigured.
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, AuthError>;

    /// Open a long-lived stream of session changes.
    fn subscribe_session_changes(&self) -> SessionSubscription;

    /// Sign in with email + password, returning the new session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] carrying the service's message on rejection.
    async fn sign_in_with_password(&self, email: &str, password: &str)
    -> Result<Option<SessionSnapshot>, AuthError>;

    /// Create an account. The session is absent when the service requires
    /// email confirmation first.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] carrying the service's message on rejection.
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Option<SessionSnapshot>, AuthError>;

    /// End the current session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the remote sign-out failed.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Profile row for `subject_id`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the lookup failed.
    async fn fetch_profile_row(&self, subject_id: &str) -> Result<Option<ProfileRow>, AuthError>;

    /// Upsert the profile row for `subject_id`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the write failed.
    async fn update_profile_row(&self, subject_id: &str, row: &ProfileRow) -> Result<(), AuthError>;
}

// =============================================================================
// OFFLINE BACKEND
// =============================================================================

/// Message returned by [`OfflineAuthBackend`] account operations.
pub const AUTH_NOT_CONFIGURED: &str = "Authentication service is not configured";

/// Backend used when no auth service is configured.
///
/// Session checks fail as transport errors so startup degrades to guest mode.
#[derive(Debug, Default)]
pub struct OfflineAuthBackend {
    events: SessionBroadcaster,
}

impl OfflineAuthBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn not_configured() -> AuthError {
        AuthError::Transport(AUTH_NOT_CONFIGURED.to_owned())
    }
}

#[async_trait::async_trait]
impl AuthBackend for OfflineAuthBackend {
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, AuthError> {
        Err(Self::not_configured())
    }

    fn subscribe_session_changes(&self) -> SessionSubscription {
        self.events.subscribe(None)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Option<SessionSnapshot>, AuthError> {
        Err(Self::not_configured())
    }

    async fn sign_up(&self, _email: &str, _password: &str, _name: &str) -> Result<Option<SessionSnapshot>, AuthError> {
        Err(Self::not_configured())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn fetch_profile_row(&self, _subject_id: &str) -> Result<Option<ProfileRow>, AuthError> {
        Ok(None)
    }

    async fn update_profile_row(&self, _subject_id: &str, _row: &ProfileRow) -> Result<(), AuthError> {
        Err(Self::not_configured())
    }
}
