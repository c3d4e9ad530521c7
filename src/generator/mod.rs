//! Password suggestions derived from a memorable word.
//!
//! DESIGN
//! ======
//! [`PasswordGenerator`] is the seam between the gated generate flow and the
//! source of suggestions: [`gemini::GeminiGenerator`] asks a hosted model,
//! [`fallback::FallbackGenerator`] applies fixed offline templates. The remote
//! generator degrades to the templates on any failure, so callers only see
//! errors from the gate itself or from custom generators.
//!
//! [`generate_gated`] is the only place guest usage is recorded, and only after
//! a generation succeeded. The attempt is reserved before the generator runs,
//! so overlapping generations cannot exceed the guest quota.

pub mod fallback;
pub mod gemini;


use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::gate::MAX_GUEST_ATTEMPTS;
use crate::lifecycle::SessionController;

/// Style of suggestion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Easier to type and remember.
    #[default]
    Easy,
    /// Stylish leetspeak.
    Cool,
    /// Hard to crack.
    Hard,
}

impl Complexity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Cool => "cool",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Weak => "Weak",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
        };
        f.pad(label)
    }
}

/// One suggested password with a rating and rationale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPassword {
    pub password: String,
    pub strength: Strength,
    pub explanation: String,
}

/// Errors produced by password generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("enter a word or phrase to build passwords from")]
    EmptyWord,

    #[error("all {max} free guest attempts are used; sign in to keep generating")]
    LimitReached { max: u32 },

    #[error("generator request failed: {0}")]
    Request(String),

    #[error("generator response unusable: {0}")]
    Response(String),
}

/// Source of password suggestions. Enables mocking in tests.
#[async_trait::async_trait]
pub trait PasswordGenerator: Send + Sync {
    /// Suggest passwords built from `word` in the given style.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerateError`] if no suggestions could be produced.
    async fn generate(&self, word: &str, complexity: Complexity) -> Result<Vec<GeneratedPassword>, GenerateError>;
}

/// Run one generation for the controller's current identity.
///
/// Rejects blank input and exhausted guests before calling `generator`;
/// records usage only when the generator succeeded. A failed or cancelled
/// generation hands its reserved attempt back.
///
/// # Errors
///
/// [`GenerateError::EmptyWord`], [`GenerateError::LimitReached`], or whatever
/// `generator` returned.
pub async fn generate_gated(
    controller: &SessionController,
    generator: &dyn PasswordGenerator,
    word: &str,
    complexity: Complexity,
) -> Result<Vec<GeneratedPassword>, GenerateError> {
    if word.trim().is_empty() {
        return Err(GenerateError::EmptyWord);
    }
    let Some(reservation) = controller.reserve_attempt() else {
        info!(max = MAX_GUEST_ATTEMPTS, "guest generation limit reached");
        return Err(GenerateError::LimitReached { max: MAX_GUEST_ATTEMPTS });
    };
    let passwords = generator.generate(word, complexity).await?;
    let count = reservation.commit();
    debug!(complexity = %complexity, suggestions = passwords.len(), guest_count = count, "passwords generated");
    Ok(passwords)
}
