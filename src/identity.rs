//! Identity reconciliation between auth-session claims and profile rows.
//!
//! DESIGN
//! ======
//! [`reconcile`] derives an identity from session claims alone so the
//! lifecycle controller can publish immediately. [`merge_profile`] layers the
//! richer profile row on top once the background lookup completes. Merges are
//! keyed by subject id: a lookup that finishes after a logout or account
//! switch no longer matches and is dropped.
//!
//! Both functions are pure and never suspend.

#[cfg(test)]
#[path = "identity_test.rs"]
mod identity_test;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Display name used when neither claims nor profile supply one.
pub const FALLBACK_DISPLAY_NAME: &str = "User";

const METADATA_NAME_KEY: &str = "name";
const METADATA_AVATAR_KEY: &str = "avatar_url";

/// The auth service's view of a live session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Opaque subject (user) identifier.
    pub subject_id: String,
    /// Email claim, when the provider asserts one.
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form user metadata claims (`name`, `avatar_url`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        non_empty(self.metadata.get(key).and_then(Value::as_str))
    }
}

/// Supplementary profile data keyed by subject id.
///
/// Field names follow the `profiles` table columns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    #[serde(rename = "full_name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "avatar_url", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

/// An authenticated user as shown to the rest of the app.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    /// Empty when the session carries no email claim.
    pub email: String,
    /// Never empty; see [`FALLBACK_DISPLAY_NAME`].
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Current identity: guest or signed-in user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(UserIdentity),
}

impl Identity {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Anonymous => None,
        }
    }

    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.user().map(|user| user.id.as_str())
    }
}

/// Derive an identity from session claims only.
#[must_use]
pub fn reconcile(session: Option<&SessionSnapshot>) -> Identity {
    let Some(session) = session else {
        return Identity::Anonymous;
    };
    Identity::Authenticated(UserIdentity {
        id: session.subject_id.clone(),
        email: session.email.clone().unwrap_or_default(),
        display_name: session
            .metadata_str(METADATA_NAME_KEY)
            .unwrap_or(FALLBACK_DISPLAY_NAME)
            .to_owned(),
        avatar_ref: session.metadata_str(METADATA_AVATAR_KEY).map(str::to_owned),
    })
}

/// Overlay non-empty profile fields onto `current` if it is `subject_id`.
///
/// Returns `current` unchanged for guests and for any other subject.
#[must_use]
pub fn merge_profile(current: &Identity, subject_id: &str, row: &ProfileRow) -> Identity {
    let Identity::Authenticated(user) = current else {
        return current.clone();
    };
    if user.id != subject_id {
        return current.clone();
    }
    let mut merged = user.clone();
    if let Some(name) = non_empty(row.display_name.as_deref()) {
        name.clone_into(&mut merged.display_name);
    }
    if let Some(avatar) = non_empty(row.avatar_ref.as_deref()) {
        merged.avatar_ref = Some(avatar.to_owned());
    }
    Identity::Authenticated(merged)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
