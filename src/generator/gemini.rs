//! Gemini-backed password generator.
//!
//! Sends one `generateContent` call with a JSON response schema and reads the
//! suggestion array out of the first candidate. Any failure (transport, HTTP
//! status, unparsable or empty output) is logged and answered with the offline
//! templates instead.

#[cfg(test)]
#[path = "gemini_test.rs"]
mod gemini_test;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::fallback::fallback_passwords;
use super::{Complexity, GenerateError, GeneratedPassword, PasswordGenerator};
use crate::config::{GeminiConfig, HttpTimeouts};

pub struct GeminiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    /// # Errors
    ///
    /// Returns [`GenerateError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &GeminiConfig, timeouts: HttpTimeouts) -> Result<Self, GenerateError> {
        let http = timeouts.client().map_err(|e| GenerateError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// One remote generation, without fallback.
    ///
    /// # Errors
    ///
    /// [`GenerateError::Request`] for transport failures and non-2xx statuses,
    /// [`GenerateError::Response`] for bodies without a usable suggestion list.
    pub async fn request(&self, word: &str, complexity: Complexity) -> Result<Vec<GeneratedPassword>, GenerateError> {
        let url = generate_content_url(&self.base_url, &self.model);
        let body = request_body(&build_prompt(word, complexity));
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| GenerateError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(GenerateError::Request(format!("status {status}: {text}")));
        }
        parse_response(&text)
    }
}

#[async_trait::async_trait]
impl PasswordGenerator for GeminiGenerator {
    async fn generate(&self, word: &str, complexity: Complexity) -> Result<Vec<GeneratedPassword>, GenerateError> {
        match self.request(word, complexity).await {
            Ok(passwords) => Ok(passwords),
            Err(e) => {
                warn!(model = %self.model, error = %e, "remote generation failed; using offline templates");
                Ok(fallback_passwords(word, complexity))
            }
        }
    }
}

// =============================================================================
// PROMPT
// =============================================================================

fn strategy(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Easy => {
            "Focus on memorability and ease of typing.\n\
             Use the input word(s) clearly.\n\
             Use simple separators like '-' or '.' or capitalized words (CamelCase).\n\
             Avoid confusing characters.\n\
             Example strategies: \"Word-Word-123\", \"Word.Word24\"."
        }
        Complexity::Cool => {
            "Make the password look \"cool\" or \"hacker-style\" using Leetspeak.\n\
             Substitute letters with numbers/symbols (e.g., E->3, A->4, S->$, T->7, O->0).\n\
             Keep the core word recognizable but stylized.\n\
             Example strategies: \"W0rd_P4ss!\", \"xX_Word_Xx\"."
        }
        Complexity::Hard => {
            "Focus on maximum security and entropy.\n\
             Break the word apart, insert random characters, mix upper/lower case unpredictably.\n\
             Use special characters heavily.\n\
             The result should be very hard to guess."
        }
    }
}

fn build_prompt(word: &str, complexity: Complexity) -> String {
    format!(
        "Create 3 distinct passwords based on the keyword: \"{word}\".\n\n\
         Complexity Preference: {level}\n\n\
         Strategy:\n{strategy}\n\n\
         Ensure they are at least 12 characters long if possible.\n\
         Provide a strength rating and a brief explanation of why it fits the \"{complexity}\" style.",
        level = complexity.as_str().to_uppercase(),
        strategy = strategy(complexity),
    )
}

// =============================================================================
// WIRE
// =============================================================================

fn generate_content_url(base_url: &str, model: &str) -> String {
    format!("{base_url}/models/{model}:generateContent")
}

fn request_body(prompt: &str) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "password": { "type": "STRING" },
                        "strength": { "type": "STRING", "enum": ["Weak", "Medium", "Strong"] },
                        "explanation": { "type": "STRING" }
                    },
                    "required": ["password", "strength", "explanation"]
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Suggestions from the first candidate's text parts.
fn parse_response(body: &str) -> Result<Vec<GeneratedPassword>, GenerateError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| GenerateError::Response(e.to_string()))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerateError::Response("empty response".to_owned()));
    }
    let passwords: Vec<GeneratedPassword> =
        serde_json::from_str(&text).map_err(|e| GenerateError::Response(e.to_string()))?;
    if passwords.is_empty() {
        return Err(GenerateError::Response("no suggestions".to_owned()));
    }
    Ok(passwords)
}
