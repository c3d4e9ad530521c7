//! Scriptable collaborators for controller and generator tests.

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::auth::{AuthBackend, AuthError, SessionBroadcaster, SessionChange, SessionSubscription};
use crate::counter::CounterStore;
use crate::generator::{Complexity, GenerateError, GeneratedPassword, PasswordGenerator, Strength};
use crate::identity::{ProfileRow, SessionSnapshot};
use crate::lifecycle::{ControllerConfig, SessionController};
use crate::storage::{KeyValueStorage, MemoryStorage, StorageError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// STORAGE
// =============================================================================

/// Storage that refuses every operation, like a disabled `localStorage`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStorage;

impl KeyValueStorage for FailingStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_owned()))
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_owned()))
    }

    fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_owned()))
    }
}

// =============================================================================
// AUTH BACKEND
// =============================================================================

/// How [`FakeBackend::get_session`] answers.
#[derive(Clone, Debug)]
pub enum SessionCheck {
    Immediate(Option<SessionSnapshot>),
    Delayed(Duration, Option<SessionSnapshot>),
    Fail,
    Stall,
}

/// In-memory [`AuthBackend`] with scripted answers.
///
/// Successful sign-in/sign-up with a session and every sign-out are announced
/// on the change stream, like the real service does.
pub struct FakeBackend {
    session_check: Mutex<SessionCheck>,
    events: SessionBroadcaster,
    profiles: Mutex<HashMap<String, ProfileRow>>,
    profile_delay: Mutex<Duration>,
    profile_fails: AtomicBool,
    sign_in: Mutex<Result<Option<SessionSnapshot>, AuthError>>,
    sign_up: Mutex<Result<Option<SessionSnapshot>, AuthError>>,
    sign_out: Mutex<Result<(), AuthError>>,
    update_fails: AtomicBool,
    profile_lookups: AtomicUsize,
    sign_in_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(session_check: SessionCheck) -> Self {
        Self {
            session_check: Mutex::new(session_check),
            events: SessionBroadcaster::new(),
            profiles: Mutex::new(HashMap::new()),
            profile_delay: Mutex::new(Duration::ZERO),
            profile_fails: AtomicBool::new(false),
            sign_in: Mutex::new(Err(rejected("Invalid login credentials"))),
            sign_up: Mutex::new(Ok(None)),
            sign_out: Mutex::new(Ok(())),
            update_fails: AtomicBool::new(false),
            profile_lookups: AtomicUsize::new(0),
            sign_in_calls: AtomicUsize::new(0),
        }
    }

    /// No session, answered immediately.
    pub fn signed_out() -> Self {
        Self::new(SessionCheck::Immediate(None))
    }

    pub fn with_session(session: SessionSnapshot) -> Self {
        Self::new(SessionCheck::Immediate(Some(session)))
    }

    pub fn set_session_check(&self, check: SessionCheck) {
        *lock(&self.session_check) = check;
    }

    pub fn set_profile(&self, subject_id: &str, row: ProfileRow) {
        lock(&self.profiles).insert(subject_id.to_owned(), row);
    }

    pub fn set_profile_delay(&self, delay: Duration) {
        *lock(&self.profile_delay) = delay;
    }

    pub fn fail_profile_lookups(&self) {
        self.profile_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_profile_updates(&self) {
        self.update_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_sign_in(&self, result: Result<Option<SessionSnapshot>, AuthError>) {
        *lock(&self.sign_in) = result;
    }

    pub fn set_sign_up(&self, result: Result<Option<SessionSnapshot>, AuthError>) {
        *lock(&self.sign_up) = result;
    }

    pub fn set_sign_out(&self, result: Result<(), AuthError>) {
        *lock(&self.sign_out) = result;
    }

    /// Push a change to every live subscription.
    pub fn emit(&self, change: &SessionChange) {
        self.events.emit(change);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    pub fn profile_lookups(&self) -> usize {
        self.profile_lookups.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn profile(&self, subject_id: &str) -> Option<ProfileRow> {
        lock(&self.profiles).get(subject_id).cloned()
    }

    fn announce(&self, session: Option<&SessionSnapshot>) {
        if let Some(session) = session {
            self.events.emit(&SessionChange::signed_in(session.clone()));
        }
    }
}

#[async_trait::async_trait]
impl AuthBackend for FakeBackend {
    async fn get_session(&self) -> Result<Option<SessionSnapshot>, AuthError> {
        let check = lock(&self.session_check).clone();
        match check {
            SessionCheck::Immediate(session) => Ok(session),
            SessionCheck::Delayed(delay, session) => {
                tokio::time::sleep(delay).await;
                Ok(session)
            }
            SessionCheck::Fail => Err(AuthError::Transport("connection refused".to_owned())),
            SessionCheck::Stall => future::pending().await,
        }
    }

    fn subscribe_session_changes(&self) -> SessionSubscription {
        self.events.subscribe(None)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Option<SessionSnapshot>, AuthError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let result = lock(&self.sign_in).clone();
        if let Ok(session) = &result {
            self.announce(session.as_ref());
        }
        result
    }

    async fn sign_up(&self, _email: &str, _password: &str, _name: &str) -> Result<Option<SessionSnapshot>, AuthError> {
        let result = lock(&self.sign_up).clone();
        if let Ok(session) = &result {
            self.announce(session.as_ref());
        }
        result
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.events.emit(&SessionChange::signed_out());
        lock(&self.sign_out).clone()
    }

    async fn fetch_profile_row(&self, subject_id: &str) -> Result<Option<ProfileRow>, AuthError> {
        self.profile_lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.profile_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.profile_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Transport("profile lookup timed out".to_owned()));
        }
        Ok(self.profile(subject_id))
    }

    async fn update_profile_row(&self, subject_id: &str, row: &ProfileRow) -> Result<(), AuthError> {
        if self.update_fails.load(Ordering::SeqCst) {
            return Err(rejected("permission denied for table profiles"));
        }
        // Upsert: columns left out of the row keep their stored value.
        let mut profiles = lock(&self.profiles);
        let stored = profiles.entry(subject_id.to_owned()).or_default();
        if row.display_name.is_some() {
            stored.display_name.clone_from(&row.display_name);
        }
        if row.avatar_ref.is_some() {
            stored.avatar_ref.clone_from(&row.avatar_ref);
        }
        Ok(())
    }
}

pub fn rejected(message: &str) -> AuthError {
    AuthError::Rejected { status: 400, message: message.to_owned() }
}

/// Session claims for `subject_id` carrying a `name` metadata claim.
pub fn session_named(subject_id: &str, name: &str) -> SessionSnapshot {
    SessionSnapshot::new(subject_id).with_metadata("name", name)
}

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub storage: Arc<MemoryStorage>,
    pub controller: SessionController,
}

/// Start a controller over `backend` with fresh in-memory storage.
pub fn start(backend: FakeBackend) -> Harness {
    start_with_storage(backend, Arc::new(MemoryStorage::new()))
}

pub fn start_with_storage(backend: FakeBackend, storage: Arc<MemoryStorage>) -> Harness {
    let backend = Arc::new(backend);
    let controller = SessionController::start(
        backend.clone(),
        CounterStore::new(storage.clone()),
        ControllerConfig::default(),
    );
    Harness { backend, storage, controller }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// Generator that counts calls and returns one fixed suggestion, or fails.
#[derive(Debug, Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
    fail: bool,
    delay: Duration,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PasswordGenerator for CountingGenerator {
    async fn generate(&self, word: &str, _complexity: Complexity) -> Result<Vec<GeneratedPassword>, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(GenerateError::Request("service unavailable".to_owned()));
        }
        Ok(vec![GeneratedPassword {
            password: format!("{word}-42!"),
            strength: Strength::Medium,
            explanation: "Fixed test suggestion.".to_owned(),
        }])
    }
}
