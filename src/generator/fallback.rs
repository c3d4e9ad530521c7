//! Offline password templates.
//!
//! Used directly when no generator key is configured and as the degraded
//! answer whenever the remote generator fails. Output is deterministic for a
//! given word and style.

#[cfg(test)]
#[path = "fallback_test.rs"]
mod fallback_test;

use super::{Complexity, GenerateError, GeneratedPassword, PasswordGenerator, Strength};

/// Three template suggestions for `word` with whitespace removed.
#[must_use]
pub fn fallback_passwords(word: &str, complexity: Complexity) -> Vec<GeneratedPassword> {
    let clean: String = word.chars().filter(|c| !c.is_whitespace()).collect();
    match complexity {
        Complexity::Easy => vec![
            suggestion(format!("{}-2024", capitalize(&clean)), Strength::Medium, "Simple capitalization with year appended."),
            suggestion(
                format!("{}.{}!", clean.to_lowercase(), clean.to_uppercase()),
                Strength::Strong,
                "Repeated word with separator.",
            ),
            suggestion(format!("My-{clean}-Pass"), Strength::Medium, "Easy to read sentence structure."),
        ],
        Complexity::Cool => vec![
            suggestion(format!("xX_{clean}_Xx"), Strength::Medium, "Gaming tag style."),
            suggestion(format!("{}!", leetspeak(&clean)), Strength::Strong, "Basic leetspeak substitution."),
            suggestion(format!("_${}$_", clean.to_uppercase()), Strength::Strong, "Wrapped in currency symbols."),
        ],
        Complexity::Hard => {
            let (head, tail) = split_at_char(&clean, 2);
            let reversed: String = clean.chars().rev().collect();
            vec![
                suggestion(format!("9#{head}Xy{tail}!m"), Strength::Strong, "Broken word with injected entropy."),
                suggestion(format!("{reversed}$92#K"), Strength::Strong, "Reversed word with suffix."),
                suggestion(format!("Qz-{clean}-77&"), Strength::Strong, "Random prefix/suffix."),
            ]
        }
    }
}

/// Generator that only uses the offline templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackGenerator;

#[async_trait::async_trait]
impl PasswordGenerator for FallbackGenerator {
    async fn generate(&self, word: &str, complexity: Complexity) -> Result<Vec<GeneratedPassword>, GenerateError> {
        Ok(fallback_passwords(word, complexity))
    }
}

fn suggestion(password: String, strength: Strength, explanation: &str) -> GeneratedPassword {
    GeneratedPassword { password, strength, explanation: explanation.to_owned() }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Lowercase `a`, `e`, `i` become `4`, `3`, `1`.
fn leetspeak(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            'a' => '4',
            'e' => '3',
            'i' => '1',
            other => other,
        })
        .collect()
}

fn split_at_char(word: &str, n: usize) -> (&str, &str) {
    match word.char_indices().nth(n) {
        Some((idx, _)) => word.split_at(idx),
        None => (word, ""),
    }
}
