//! Account operations on top of the lifecycle controller.
//!
//! Sign-in and sign-up do not touch the published identity directly; the
//! backend announces the new session on the change stream and the controller's
//! listener applies it. Sign-out is the exception: identity drops to
//! `Anonymous` locally even when the remote call fails.

#[cfg(test)]
#[path = "account_test.rs"]
mod account_test;

use tracing::{debug, info, warn};

use crate::auth::{AuthChangeKind, SessionChange};
use crate::identity::{ProfileRow, SessionSnapshot};
use crate::lifecycle::SessionController;

pub const PASSWORD_REQUIRED: &str = "Password is required";
pub const LOGIN_FAILED: &str = "Login failed";
pub const REGISTRATION_FAILED: &str = "Registration failed";
pub const VERIFY_EMAIL_FIRST: &str = "Account created. Please check if you need to verify your email, then login.";
pub const PROFILE_UPDATE_FAILED: &str = "Error updating profile";
pub const AVATAR_UPDATE_FAILED: &str = "Error uploading avatar";
pub const AVATAR_REQUIRED: &str = "You must select an image to upload.";
pub const SIGN_IN_REQUIRED: &str = "You must be signed in to update your profile";

/// A failed account operation, carrying the message to show the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthOperationError {
    pub message: String,
}

impl AuthOperationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl SessionController {
    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`PASSWORD_REQUIRED`] for an empty password, otherwise the
    /// service's message or [`LOGIN_FAILED`].
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthOperationError> {
        if password.is_empty() {
            return Err(AuthOperationError::new(PASSWORD_REQUIRED));
        }
        match self.backend().sign_in_with_password(email, password).await {
            Ok(_) => {
                info!(email, "signed in");
                Ok(())
            }
            Err(e) => {
                warn!(email, error = %e, "sign-in rejected");
                Err(AuthOperationError::new(e.message_or(LOGIN_FAILED)))
            }
        }
    }

    /// Create an account whose profile name is `name`.
    ///
    /// Returns the session when the service signs the new account in straight
    /// away, `None` when it waits for email confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`PASSWORD_REQUIRED`] for an empty password, otherwise the
    /// service's message or [`REGISTRATION_FAILED`].
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionSnapshot>, AuthOperationError> {
        if password.is_empty() {
            return Err(AuthOperationError::new(PASSWORD_REQUIRED));
        }
        match self.backend().sign_up(email, password, name).await {
            Ok(session) => {
                info!(email, confirmed = session.is_some(), "account created");
                Ok(session)
            }
            Err(e) => {
                warn!(email, error = %e, "sign-up rejected");
                Err(AuthOperationError::new(e.message_or(REGISTRATION_FAILED)))
            }
        }
    }

    /// Sign up, then sign in explicitly if the service returned no session.
    ///
    /// # Errors
    ///
    /// Sign-up failures as in [`Self::sign_up`]. If the follow-up sign-in
    /// fails the account exists but is unconfirmed: [`VERIFY_EMAIL_FIRST`].
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), AuthOperationError> {
        if self.sign_up(name, email, password).await?.is_some() {
            return Ok(());
        }
        match self.sign_in(email, password).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(email, error = %e, "sign-in after sign-up failed; confirmation likely pending");
                Err(AuthOperationError::new(VERIFY_EMAIL_FIRST))
            }
        }
    }

    /// End the session. Remote failures are logged; identity becomes
    /// `Anonymous` regardless.
    pub async fn sign_out(&self) {
        if let Err(e) = self.backend().sign_out().await {
            warn!(error = %e, "remote sign-out failed; clearing local identity anyway");
        }
        self.apply_local_change(&SessionChange::signed_out());
        info!("signed out");
    }

    /// Re-read the session and wait for the profile merge of its subject.
    ///
    /// Without a session there is nothing to refresh; identity is left alone.
    pub async fn refresh_user(&self) {
        let session = match self.backend().get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("no session to refresh; keeping current identity");
                return;
            }
            Err(e) => {
                warn!(error = %e, "session refresh failed; keeping current identity");
                return;
            }
        };
        let change = SessionChange::new(AuthChangeKind::UserUpdated, Some(session));
        if let Some(subject_id) = self.apply_local_change(&change) {
            self.enrich_profile(&subject_id).await;
        }
    }

    /// Store `display_name` in the current user's profile row, then refresh.
    ///
    /// # Errors
    ///
    /// Returns [`SIGN_IN_REQUIRED`] for guests, otherwise the service's
    /// message or [`PROFILE_UPDATE_FAILED`].
    pub async fn update_profile(&self, display_name: &str) -> Result<(), AuthOperationError> {
        let row = ProfileRow { display_name: Some(display_name.trim().to_owned()), avatar_ref: None };
        self.store_profile(&row, PROFILE_UPDATE_FAILED).await
    }

    /// Point the current user's avatar at `avatar_ref` (an image URL), then
    /// refresh. The display name is left as stored.
    ///
    /// # Errors
    ///
    /// Returns [`AVATAR_REQUIRED`] for a blank reference, [`SIGN_IN_REQUIRED`]
    /// for guests, otherwise the service's message or [`AVATAR_UPDATE_FAILED`].
    pub async fn update_avatar(&self, avatar_ref: &str) -> Result<(), AuthOperationError> {
        let avatar_ref = avatar_ref.trim();
        if avatar_ref.is_empty() {
            return Err(AuthOperationError::new(AVATAR_REQUIRED));
        }
        let row = ProfileRow { display_name: None, avatar_ref: Some(avatar_ref.to_owned()) };
        self.store_profile(&row, AVATAR_UPDATE_FAILED).await
    }

    async fn store_profile(&self, row: &ProfileRow, fallback: &str) -> Result<(), AuthOperationError> {
        let Some(subject_id) = self.identity().subject_id().map(str::to_owned) else {
            return Err(AuthOperationError::new(SIGN_IN_REQUIRED));
        };
        if let Err(e) = self.backend().update_profile_row(&subject_id, row).await {
            warn!(subject_id = %subject_id, error = %e, "profile update rejected");
            return Err(AuthOperationError::new(e.message_or(fallback)));
        }
        self.refresh_user().await;
        Ok(())
    }
}
