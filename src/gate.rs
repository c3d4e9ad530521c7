//! Guest usage gate for password generation.
//!
//! SYSTEM CONTEXT
//! ==============
//! Guests get a fixed number of generations, tracked in the persisted guest
//! counter. Signed-in users are never gated and never touch the counter, so a
//! later sign-out resumes the guest quota where it stopped.
//!
//! The gate only records usage; callers check [`can_perform`] before the
//! privileged action and call [`UsageGate::consume`] after it ran. Callers that
//! suspend between the two hold a reservation instead
//! ([`UsageGate::try_reserve`]), so concurrent guests cannot overrun the quota
//! while their actions are in flight.

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;

use tracing::debug;

use crate::counter::CounterStore;
use crate::identity::Identity;

/// Free generations available to an unauthenticated guest.
pub const MAX_GUEST_ATTEMPTS: u32 = 3;

/// Whether `identity` may run a privileged action given the guest `counter`.
#[must_use]
pub fn can_perform(identity: &Identity, counter: u32) -> bool {
    identity.is_authenticated() || counter < MAX_GUEST_ATTEMPTS
}

/// Record one privileged action against `counter`, persisting through `store`.
///
/// Returns `counter` untouched, with no storage write, when authenticated.
pub fn consume(identity: &Identity, counter: u32, store: &CounterStore) -> u32 {
    if identity.is_authenticated() {
        return counter;
    }
    let next = counter.saturating_add(1);
    store.write(next);
    next
}

/// Outcome of [`UsageGate::try_reserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Authenticated; nothing was reserved.
    Unlimited,
    /// A guest attempt is held until committed or released.
    Reserved,
    /// Guest quota exhausted, counting attempts already in flight.
    Denied,
}

/// Single writer of the guest counter.
pub struct UsageGate {
    count: u32,
    in_flight: u32,
    store: CounterStore,
}

impl UsageGate {
    /// Seed the in-memory count from `store`.
    #[must_use]
    pub fn load(store: CounterStore) -> Self {
        let count = store.read();
        debug!(count, "guest counter loaded");
        Self { count, in_flight: 0, store }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn can_perform(&self, identity: &Identity) -> bool {
        can_perform(identity, self.count)
    }

    /// Guest attempts left, or `None` when `identity` is not gated.
    #[must_use]
    pub fn remaining(&self, identity: &Identity) -> Option<u32> {
        if identity.is_authenticated() {
            None
        } else {
            Some(MAX_GUEST_ATTEMPTS.saturating_sub(self.count))
        }
    }

    /// Guest attempts reserved but not yet committed or released.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Hold one attempt for `identity` before running the action.
    pub fn try_reserve(&mut self, identity: &Identity) -> Admission {
        if identity.is_authenticated() {
            return Admission::Unlimited;
        }
        if !can_perform(identity, self.count.saturating_add(self.in_flight)) {
            return Admission::Denied;
        }
        self.in_flight += 1;
        Admission::Reserved
    }

    /// Give back a reserved attempt without recording usage.
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Record one privileged action; returns the resulting count.
    ///
    /// Guests increment and persist. Authenticated users leave the counter and
    /// storage untouched.
    pub fn consume(&mut self, identity: &Identity) -> u32 {
        let next = consume(identity, self.count, &self.store);
        if next != self.count {
            debug!(count = next, "guest usage recorded");
        }
        self.count = next;
        next
    }
}
