//! Session lifecycle controller.
//!
//! DESIGN
//! ======
//! The controller owns the observable [`SessionView`] (identity plus
//! `Loading`/`Ready`) in a `tokio::sync::watch` channel. Three background
//! tasks race to move it out of `Loading`:
//!
//! - the initial session check (`AuthBackend::get_session`)
//! - the session-change listener
//! - the safety timer
//!
//! Whichever reaches the not-yet-ready guard first records itself as the
//! [`ReadyTrigger`]. `Ready` is terminal; later events only replace identity.
//!
//! ORDERING
//! ========
//! All view mutations run inside `watch::Sender::send_if_modified`, so they are
//! serialized by the channel lock. A session-changing event sets
//! `session_event_applied` under that lock; the initial check reads it under
//! the same lock and, if set, only marks `Ready`. A late initial check can
//! therefore never overwrite identity that came from a newer event.
//!
//! Profile enrichment runs as tracked tasks. A merge result is applied only if
//! the published identity still has the subject id it was fetched for.
//!
//! TEARDOWN
//! ========
//! [`SessionController::teardown`] clears the liveness flag and aborts every
//! tracked task, which drops the change subscription and the timer. Every
//! publication checks the flag first, so nothing is published afterwards.
//! Dropping the controller tears it down.

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod lifecycle_test;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{AuthBackend, AuthChangeKind, SessionChange, SessionSubscription};
use crate::counter::CounterStore;
use crate::gate::{Admission, UsageGate};
use crate::identity::{Identity, ProfileRow, SessionSnapshot, merge_profile, reconcile};

/// Upper bound on time spent in `Loading`.
pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_millis(2_500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Loading,
    Ready,
}

/// What moved the lifecycle to `Ready`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyTrigger {
    /// The initial `get_session` call returned or failed.
    SessionCheck,
    /// A pushed session change arrived first.
    SessionEvent,
    /// The safety timer fired while still loading.
    SafetyTimeout,
}

/// Snapshot published to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionView {
    pub identity: Identity,
    pub lifecycle: LifecycleState,
    pub ready_trigger: Option<ReadyTrigger>,
}

impl SessionView {
    fn loading() -> Self {
        Self { identity: Identity::Anonymous, lifecycle: LifecycleState::Loading, ready_trigger: None }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lifecycle == LifecycleState::Ready
    }

    /// `Loading -> Ready`. Returns false when already ready.
    fn mark_ready(&mut self, trigger: ReadyTrigger) -> bool {
        if self.is_ready() {
            return false;
        }
        self.lifecycle = LifecycleState::Ready;
        self.ready_trigger = Some(trigger);
        true
    }

    fn set_identity(&mut self, identity: Identity) -> bool {
        if self.identity == identity {
            return false;
        }
        self.identity = identity;
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub safety_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { safety_timeout: DEFAULT_SAFETY_TIMEOUT }
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct Shared {
    backend: Arc<dyn AuthBackend>,
    state: watch::Sender<SessionView>,
    alive: AtomicBool,
    session_event_applied: AtomicBool,
    gate: Mutex<UsageGate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mutate the view under the channel lock. No-op once torn down.
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SessionView) -> bool,
    {
        self.state.send_if_modified(|view| self.is_alive() && f(view))
    }

    fn mark_ready(&self, trigger: ReadyTrigger) -> bool {
        let became_ready = self.update(|view| view.mark_ready(trigger));
        if became_ready {
            info!(trigger = ?trigger, "session lifecycle ready");
        }
        became_ready
    }

    /// Apply the initial session check result. Returns the subject to enrich.
    fn apply_session_check(&self, session: Option<&SessionSnapshot>) -> Option<String> {
        let identity = reconcile(session);
        let mut became_ready = false;
        let mut superseded = false;
        self.update(|view| {
            became_ready = view.mark_ready(ReadyTrigger::SessionCheck);
            if self.session_event_applied.load(Ordering::SeqCst) {
                superseded = true;
                return became_ready;
            }
            view.set_identity(identity) | became_ready
        });
        if became_ready {
            info!(trigger = ?ReadyTrigger::SessionCheck, "session lifecycle ready");
        }
        if superseded {
            debug!("initial session result superseded by a session event");
            return None;
        }
        session.map(|s| s.subject_id.clone())
    }

    /// Apply a pushed session change. Returns the subject to enrich.
    ///
    /// Identity is rebuilt from the change's claims even for the subject
    /// already published, so a profile-merged name shows the claims name until
    /// the returned subject's merge lands.
    fn apply_change(&self, change: &SessionChange) -> Option<String> {
        debug!(kind = change.kind.as_str(), "session change received");
        if !change.kind.changes_session() {
            self.mark_ready(ReadyTrigger::SessionEvent);
            return None;
        }
        let identity = match change.kind {
            AuthChangeKind::SignedOut => Identity::Anonymous,
            _ => reconcile(change.session.as_ref()),
        };
        let subject = identity.subject_id().map(str::to_owned);
        let mut became_ready = false;
        self.update(|view| {
            self.session_event_applied.store(true, Ordering::SeqCst);
            became_ready = view.mark_ready(ReadyTrigger::SessionEvent);
            view.set_identity(identity) | became_ready
        });
        if became_ready {
            info!(trigger = ?ReadyTrigger::SessionEvent, "session lifecycle ready");
        }
        subject
    }

    /// Merge `row` if `subject_id` is still the published identity.
    fn apply_profile(&self, subject_id: &str, row: &ProfileRow) -> bool {
        let mut stale = true;
        let applied = self.update(|view| {
            if view.identity.subject_id() != Some(subject_id) {
                return false;
            }
            stale = false;
            let merged = merge_profile(&view.identity, subject_id, row);
            view.set_identity(merged)
        });
        if stale {
            debug!(subject_id, "stale profile merge discarded");
        }
        applied
    }

    async fn enrich_profile(&self, subject_id: &str) {
        match self.backend.fetch_profile_row(subject_id).await {
            Ok(Some(row)) => {
                if self.apply_profile(subject_id, &row) {
                    debug!(subject_id, "profile merged into identity");
                }
            }
            Ok(None) => debug!(subject_id, "no profile row"),
            Err(e) => warn!(subject_id, error = %e, "profile lookup failed; keeping session claims"),
        }
    }

    fn spawn_profile_merge(self: &Arc<Self>, subject_id: String) {
        let shared = Arc::clone(self);
        self.track(tokio::spawn(async move {
            shared.enrich_profile(&subject_id).await;
        }));
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        if !self.is_alive() {
            handle.abort();
            return;
        }
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn gate(&self) -> MutexGuard<'_, UsageGate> {
        lock(&self.gate)
    }

    fn identity(&self) -> Identity {
        self.state.borrow().identity.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_safety_timer(shared: Arc<Shared>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if shared.mark_ready(ReadyTrigger::SafetyTimeout) {
        warn!(timeout_ms = timeout.as_millis(), "session check still pending; forced ready");
    }
}

async fn run_initial_check(shared: Arc<Shared>) {
    let subject = match shared.backend.get_session().await {
        Ok(session) => shared.apply_session_check(session.as_ref()),
        Err(e) => {
            warn!(error = %e, "session check failed; continuing as guest");
            shared.apply_session_check(None)
        }
    };
    if let Some(subject_id) = subject {
        shared.enrich_profile(&subject_id).await;
    }
}

async fn run_listener(shared: Arc<Shared>, mut changes: SessionSubscription) {
    while let Some(change) = changes.recv().await {
        if !shared.is_alive() {
            break;
        }
        if let Some(subject_id) = shared.apply_change(&change) {
            shared.spawn_profile_merge(subject_id);
        }
    }
    changes.unsubscribe();
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Owns the session lifecycle and the guest usage gate.
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Load the guest counter, then start the session check, change listener
    /// and safety timer on the current tokio runtime.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(backend: Arc<dyn AuthBackend>, counter: CounterStore, config: ControllerConfig) -> Self {
        let gate = UsageGate::load(counter);
        let (state, _) = watch::channel(SessionView::loading());
        let changes = backend.subscribe_session_changes();
        let shared = Arc::new(Shared {
            backend,
            state,
            alive: AtomicBool::new(true),
            session_event_applied: AtomicBool::new(false),
            gate: Mutex::new(gate),
            tasks: Mutex::new(Vec::new()),
        });

        shared.track(tokio::spawn(run_safety_timer(Arc::clone(&shared), config.safety_timeout)));
        shared.track(tokio::spawn(run_initial_check(Arc::clone(&shared))));
        shared.track(tokio::spawn(run_listener(Arc::clone(&shared), changes)));
        debug!(safety_timeout_ms = config.safety_timeout.as_millis(), "session controller started");

        Self { shared }
    }

    /// Stop all background work. Later results are discarded. Idempotent.
    pub fn teardown(&self) {
        if !self.shared.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let tasks = std::mem::take(&mut *lock(&self.shared.tasks));
        for task in &tasks {
            task.abort();
        }
        debug!(aborted = tasks.len(), "session controller torn down");
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Observe view changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> SessionView {
        self.shared.state.borrow().clone()
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.shared.identity()
    }

    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.state.borrow().lifecycle
    }

    /// Resolve once `predicate` holds for the published view.
    pub async fn wait_for<F>(&self, mut predicate: F) -> SessionView
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut rx = self.subscribe();
        match rx.wait_for(&mut predicate).await {
            Ok(view) => view.clone(),
            Err(_) => self.current(),
        }
    }

    /// Resolve once the lifecycle is `Ready`.
    pub async fn wait_until_ready(&self) -> SessionView {
        self.wait_for(SessionView::is_ready).await
    }

    // -------------------------------------------------------------------------
    // Usage gate
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn guest_usage_count(&self) -> u32 {
        self.shared.gate().count()
    }

    /// Whether the current identity may generate.
    #[must_use]
    pub fn has_attempts_remaining(&self) -> bool {
        let identity = self.identity();
        self.shared.gate().can_perform(&identity)
    }

    /// Guest attempts left, or `None` when signed in.
    #[must_use]
    pub fn remaining_attempts(&self) -> Option<u32> {
        let identity = self.identity();
        self.shared.gate().remaining(&identity)
    }

    /// Record one generation for the current identity; returns the count.
    pub fn record_usage(&self) -> u32 {
        let identity = self.identity();
        self.shared.gate().consume(&identity)
    }

    /// Hold one attempt for the current identity across a suspending action.
    ///
    /// Returns `None` when the guest quota, including attempts already held, is
    /// spent. Commit the reservation once the action succeeded; dropping it
    /// gives the attempt back.
    #[must_use]
    pub fn reserve_attempt(&self) -> Option<UsageReservation> {
        let identity = self.identity();
        let held = match self.shared.gate().try_reserve(&identity) {
            Admission::Denied => return None,
            Admission::Reserved => true,
            Admission::Unlimited => false,
        };
        Some(UsageReservation { shared: Arc::clone(&self.shared), held, settled: false })
    }

    // -------------------------------------------------------------------------
    // Account plumbing
    // -------------------------------------------------------------------------

    pub(crate) fn backend(&self) -> &dyn AuthBackend {
        self.shared.backend.as_ref()
    }

    /// Apply a locally originated change as if the backend had pushed it.
    pub(crate) fn apply_local_change(&self, change: &SessionChange) -> Option<String> {
        self.shared.apply_change(change)
    }

    /// Fetch and merge the profile for `subject_id`, awaiting the result.
    pub(crate) async fn enrich_profile(&self, subject_id: &str) {
        self.shared.enrich_profile(subject_id).await;
    }
}

/// A guest attempt held by [`SessionController::reserve_attempt`].
pub struct UsageReservation {
    shared: Arc<Shared>,
    held: bool,
    settled: bool,
}

impl UsageReservation {
    /// Record the usage for the identity published now; returns the count.
    pub fn commit(mut self) -> u32 {
        self.settled = true;
        let identity = self.shared.identity();
        let mut gate = self.shared.gate();
        if self.held {
            gate.release();
        }
        gate.consume(&identity)
    }
}

impl Drop for UsageReservation {
    fn drop(&mut self) {
        if self.held && !self.settled {
            self.shared.gate().release();
            debug!("guest attempt released");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}
