//! Durable guest-usage counter.
//!
//! ERROR HANDLING
//! ==============
//! The counter must never block the app: unreadable or corrupt values read as
//! zero and failed writes are dropped. Both paths are logged so a broken
//! profile directory is still diagnosable.

#[cfg(test)]
#[path = "counter_test.rs"]
mod counter_test;

use std::sync::Arc;

use tracing::warn;

use crate::storage::KeyValueStorage;

/// Storage key holding the guest attempt count.
pub const GUEST_COUNT_KEY: &str = "passgen_guest_count";

/// Infallible view over the guest counter entry in [`KeyValueStorage`].
#[derive(Clone)]
pub struct CounterStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl CounterStore {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_key(storage, GUEST_COUNT_KEY)
    }

    #[must_use]
    pub fn with_key(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self { storage, key: key.into() }
    }

    /// Current persisted count; 0 when absent, corrupt, or inaccessible.
    #[must_use]
    pub fn read(&self) -> u32 {
        match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => parse_count(&raw).unwrap_or_else(|| {
                warn!(key = %self.key, raw = %raw, "guest counter value is corrupt; treating as 0");
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                warn!(key = %self.key, error = %e, "guest counter unreadable; treating as 0");
                0
            }
        }
    }

    /// Persist `value`, best-effort.
    pub fn write(&self, value: u32) {
        if let Err(e) = self.storage.set_item(&self.key, &value.to_string()) {
            warn!(key = %self.key, value, error = %e, "guest counter write dropped");
        }
    }
}

fn parse_count(raw: &str) -> Option<u32> {
    match raw.trim().parse::<u32>() {
        Ok(count) => Some(count),
        Err(_) => None,
    }
}
