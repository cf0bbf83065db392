//! One-shot text generation for the turn-based assistant

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default REST endpoint for text generation
pub const DEFAULT_GENERATE_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Produces a text reply to a prompt
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply to `prompt`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply carries no text
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Gemini `generateContent` client
pub struct GeminiTextClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl GeminiTextClient {
    /// Client for `model` against the default endpoint
    #[must_use]
    pub fn new(model: impl Into<String>, api_key: SecretString) -> Self {
        Self::with_endpoint(DEFAULT_GENERATE_ENDPOINT, model, api_key)
    }

    /// Client against a custom endpoint
    #[must_use]
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        let model = model.into();
        let model = model.strip_prefix("models/").unwrap_or(&model).to_string();
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiTextClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "generating reply");

        let request = GenerateRequest {
            contents: [Content {
                parts: [TextPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.expose_secret())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("generateContent error {status}: {body}")));
        }

        let reply: GenerateResponse = response.json().await?;
        reply
            .into_text()
            .ok_or_else(|| Error::Generation("reply contained no text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = GenerateRequest {
            contents: [Content {
                parts: [TextPart { text: "hello" }],
            }],
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#
        );
    }

    #[test]
    fn test_reply_text_extraction() {
        let reply: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hi "},{"text":"there."}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.into_text().as_deref(), Some("Hi there."));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(empty.into_text().is_none());
    }

    #[test]
    fn test_model_prefix_is_stripped() {
        let client = GeminiTextClient::with_endpoint(
            "https://example.com/v1beta/",
            "models/gemini-2.0-flash",
            SecretString::from("k".to_string()),
        );
        assert_eq!(
            client.url(),
            "https://example.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
