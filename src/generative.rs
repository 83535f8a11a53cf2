//! Generative fallback provider.
//!
//! When no knowledge-base entry is close enough, the query goes to an
//! external generative model. The prompt asks for fenced code blocks and
//! `[Explanation]` tags so the classifier's grammar has a fair chance of
//! matching the reply.

use serde_json::{json, Value};
use std::time::Duration;

pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("generative model is not configured")]
    Disabled,

    #[error("generative request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generative response was malformed: {0}")]
    Malformed(String),
}

pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Append the formatting instructions the classifier expects.
pub fn build_prompt(user_query: &str) -> String {
    format!(
        "{user_query}. If the response contains code, please enclose it in \
         markdown code blocks (e.g., ```python\n# code here\n```). \
         If you provide an explanation, please enclose it in \
         [Explanation] and [/Explanation] tags."
    )
}

/// Google Generative Language API client.
pub struct GeminiProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    /// Build a provider from the `GOOGLE_API_KEY` environment variable.
    /// Returns None when the key is unset so the caller can degrade to
    /// a disabled provider instead of failing startup.
    pub fn from_env(model: &str, timeout: Duration) -> Option<Self> {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .ok()?;

        Some(GeminiProvider {
            client,
            api_key,
            model: model.to_string(),
        })
    }

    fn extract_text(resp: &Value) -> Result<String, ProviderError> {
        if let Some(error) = resp.get("error") {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(ProviderError::Malformed(format!(
                "provider error: {message}"
            )));
        }

        resp.get("candidates")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.get("parts"))
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::Malformed("no candidate text in response".to_string()))
    }
}

impl Generator for GeminiProvider {
    fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()?
            .json::<Value>()?;

        Self::extract_text(&resp)
    }
}

/// Stand-in used when no API key is configured. Fallback queries then
/// surface an apology instead of an answer.
pub struct DisabledProvider;

impl Generator for DisabledProvider {
    fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_formatting_instructions() {
        let prompt = build_prompt("how do I sort a vec");
        assert!(prompt.starts_with("how do I sort a vec"));
        assert!(prompt.contains("```"));
        assert!(prompt.contains("[Explanation]"));
        assert!(prompt.contains("[/Explanation]"));
    }

    #[test]
    fn test_extract_text_from_candidate() {
        let resp = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "an answer" }] }
            }]
        });

        assert_eq!(GeminiProvider::extract_text(&resp).unwrap(), "an answer");
    }

    #[test]
    fn test_extract_text_surfaces_api_error() {
        let resp = json!({
            "error": { "code": 400, "message": "API key not valid" }
        });

        let result = GeminiProvider::extract_text(&resp);
        match result {
            Err(ProviderError::Malformed(msg)) => assert!(msg.contains("API key not valid")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_text_empty_candidates() {
        let resp = json!({ "candidates": [] });
        assert!(matches!(
            GeminiProvider::extract_text(&resp),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_disabled_provider_errors() {
        let result = DisabledProvider.generate("anything");
        assert!(matches!(result, Err(ProviderError::Disabled)));
    }
}
