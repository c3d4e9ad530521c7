//! Supabase-compatible REST auth backend.
//!
//! ARCHITECTURE
//! ============
//! Account calls go to the GoTrue endpoints under `/auth/v1`, profile rows to
//! the PostgREST `profiles` table under `/rest/v1`. The active session is
//! persisted in [`KeyValueStorage`] so `get_session` answers from local state
//! without a network round trip, the same way the browser SDK does.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx responses become [`AuthError::Rejected`] with the most specific
//! message the body offers. Sign-out always clears the local session, even when
//! the remote revoke fails.

#[cfg(test)]
#[path = "rest_test.rs"]
mod rest_test;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{AuthBackend, AuthError, SessionBroadcaster, SessionChange, SessionSubscription};
use crate::config::{AuthConfig, HttpTimeouts};
use crate::identity::{ProfileRow, SessionSnapshot};
use crate::storage::KeyValueStorage;

/// Storage key holding the persisted session JSON.
pub const SESSION_STORAGE_KEY: &str = "passgen_auth_session";

const PROFILE_COLUMNS: &str = "full_name,avatar_url";

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
}

impl WireUser {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            subject_id: self.id.clone(),
            email: self.email.clone().filter(|e| !e.is_empty()),
            metadata: self.user_metadata.clone(),
        }
    }
}

/// Session as persisted locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: WireUser,
}

/// Body of `/auth/v1/signup`: a full session when auto-confirm is on, else
/// the bare user object.
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<WireUser>,
}

impl SignUpResponse {
    fn into_session(self) -> Option<StoredSession> {
        match (self.access_token, self.user) {
            (Some(access_token), Some(user)) => Some(StoredSession { access_token, refresh_token: self.refresh_token, user }),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpMetadata<'a>,
}

#[derive(Serialize)]
struct SignUpMetadata<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct ProfileUpsert<'a> {
    id: &'a str,
    #[serde(flatten)]
    row: &'a ProfileRow,
}

// =============================================================================
// BACKEND
// =============================================================================

pub struct RestAuthBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    storage: Arc<dyn KeyValueStorage>,
    events: SessionBroadcaster,
}

impl RestAuthBackend {
    /// Build a backend for `config`, persisting sessions in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &AuthConfig, timeouts: HttpTimeouts, storage: Arc<dyn KeyValueStorage>) -> Result<Self, AuthError> {
        let http = timeouts.client().map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            storage,
            events: SessionBroadcaster::new(),
        })
    }

    fn load_session(&self) -> Result<Option<StoredSession>, AuthError> {
        let raw = self
            .storage
            .get_item(SESSION_STORAGE_KEY)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        match raw {
            Some(raw) => decode_stored_session(&raw),
            None => Ok(None),
        }
    }

    fn save_session(&self, session: &StoredSession) -> Result<(), AuthError> {
        let raw = serde_json::to_string(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.storage
            .set_item(SESSION_STORAGE_KEY, &raw)
            .map_err(|e| AuthError::Storage(e.to_string()))
    }

    fn clear_session(&self) {
        if let Err(e) = self.storage.remove_item(SESSION_STORAGE_KEY) {
            warn!(error = %e, "failed to clear persisted session");
        }
    }

    /// Persist `session` and announce it to subscribers.
    fn establish(&self, session: &StoredSession) -> Result<SessionSnapshot, AuthError> {
        self.save_session(session)?;
        let snapshot = session.user.snapshot();
        self.events.emit(&SessionChange::signed_in(snapshot.clone()));
        Ok(snapshot)
    }

    fn bearer(&self) -> String {
        match self.load_session() {
            Ok(Some(session)) => session.access_token,
            _ => self.api_key.clone(),
        }
    }

    /// `GET /rest/v1/profiles` filtered to one subject.
    fn profile_lookup(&self, subject_id: &str) -> reqwest::RequestBuilder {
        self.http
            .get(rest_url(&self.base_url, "profiles"))
            .query(&[("id", format!("eq.{subject_id}")), ("select", PROFILE_COLUMNS.to_owned())])
            .bearer_auth(self.bearer())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, AuthError> {
        let response = request
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(AuthError::Rejected { status, message: rejection_message(status, &body) });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl AuthBackend for RestAuthBackend {
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, AuthError> {
        Ok(self.load_session()?.map(|session| session.user.snapshot()))
    }

    fn subscribe_session_changes(&self) -> SessionSubscription {
        let current = match self.load_session() {
            Ok(session) => session.map(|s| s.user.snapshot()),
            Err(e) => {
                debug!(error = %e, "no readable session for initial event");
                None
            }
        };
        self.events.subscribe(Some(SessionChange::initial(current)))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionSnapshot>, AuthError> {
        let url = auth_url(&self.base_url, "token?grant_type=password");
        let body = self
            .send(self.http.post(url).json(&PasswordCredentials { email, password }))
            .await?;
        let session: StoredSession = serde_json::from_str(&body).map_err(|e| AuthError::Parse(e.to_string()))?;
        self.establish(&session).map(Some)
    }

    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Option<SessionSnapshot>, AuthError> {
        let url = auth_url(&self.base_url, "signup");
        let request = SignUpRequest { email, password, data: SignUpMetadata { name } };
        let body = self.send(self.http.post(url).json(&request)).await?;
        let response: SignUpResponse = serde_json::from_str(&body).map_err(|e| AuthError::Parse(e.to_string()))?;
        match response.into_session() {
            Some(session) => self.establish(&session).map(Some),
            None => {
                debug!("sign-up accepted without a session; confirmation pending");
                Ok(None)
            }
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.load_session()?;
        let remote = match session {
            Some(session) => {
                let url = auth_url(&self.base_url, "logout");
                self.send(self.http.post(url).bearer_auth(&session.access_token))
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };
        self.clear_session();
        self.events.emit(&SessionChange::signed_out());
        remote
    }

    async fn fetch_profile_row(&self, subject_id: &str) -> Result<Option<ProfileRow>, AuthError> {
        let body = self.send(self.profile_lookup(subject_id)).await?;
        parse_profile_rows(&body)
    }

    async fn update_profile_row(&self, subject_id: &str, row: &ProfileRow) -> Result<(), AuthError> {
        let url = rest_url(&self.base_url, "profiles");
        let request = self
            .http
            .post(url)
            .bearer_auth(self.bearer())
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&ProfileUpsert { id: subject_id, row });
        self.send(request).await.map(|_| ())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn auth_url(base_url: &str, path: &str) -> String {
    format!("{base_url}/auth/v1/{path}")
}

fn rest_url(base_url: &str, table: &str) -> String {
    format!("{base_url}/rest/v1/{table}")
}

/// Pick the most specific human-readable message from an error body.
fn rejection_message(status: u16, body: &str) -> String {
    let message = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => ["error_description", "msg", "message", "error"]
            .iter()
            .filter_map(|key| fields.get(*key).and_then(Value::as_str))
            .find(|message| !message.trim().is_empty())
            .map(str::to_owned),
        _ => None,
    };
    message.unwrap_or_else(|| format!("request failed with status {status}"))
}

fn parse_profile_rows(body: &str) -> Result<Option<ProfileRow>, AuthError> {
    let rows: Vec<ProfileRow> = serde_json::from_str(body).map_err(|e| AuthError::Parse(e.to_string()))?;
    Ok(rows.into_iter().next())
}

/// Decode a persisted session; unreadable JSON counts as no session.
fn decode_stored_session(raw: &str) -> Result<Option<StoredSession>, AuthError> {
    match serde_json::from_str(raw) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            warn!(error = %e, "persisted session is unreadable; ignoring it");
            Ok(None)
        }
    }
}
