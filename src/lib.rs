//! passgen — session lifecycle and guest usage gating for a password generator.
//!
//! SYSTEM CONTEXT
//! ==============
//! The app lets guests generate a few passwords before asking them to sign
//! in. This crate owns the client side of that contract: who the user is, when
//! that answer is trustworthy, and how many guest generations are left.
//!
//! - `lifecycle` publishes the current [`identity::Identity`] and a
//!   `Loading`/`Ready` flag, reconciling the initial session check with pushed
//!   session changes.
//! - `gate` and `counter` enforce the guest quota, persisted in `storage`.
//! - `auth` is the external account service; `account` layers sign-in,
//!   registration and profile edits on the controller.
//! - `generator` turns a word into suggestions and is the only consumer of the
//!   gate.
//!
//! The `passgen` binary wires these together from environment configuration.

pub mod account;
pub mod auth;
pub mod config;
pub mod counter;
pub mod gate;
pub mod generator;
pub mod identity;
pub mod lifecycle;
pub mod storage;

#[cfg(test)]
mod test_helpers;
