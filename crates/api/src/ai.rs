//! Generative-AI provider client
//!
//! Thin client for the text-completion provider behind the AI analytics
//! features. The provider is an interface boundary: callers must pass the
//! entitlement gate before invoking it, and a missing API key fails closed
//! with a structured error rather than a crash.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Client for the generative-AI completion endpoint
#[derive(Clone)]
pub struct InsightsService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl InsightsService {
    /// Build the client from `KARVICO_AI_API_KEY` (and optionally
    /// `KARVICO_AI_BASE_URL` / `KARVICO_AI_MODEL`). A missing key leaves
    /// the service disabled, not broken.
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: std::env::var("KARVICO_AI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            api_key: std::env::var("KARVICO_AI_API_KEY").unwrap_or_default(),
            model: std::env::var("KARVICO_AI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
        }
    }

    /// Build a client against an explicit endpoint (used by tests)
    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            model: "gemini-1.5-flash".to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Request a text completion for a prompt
    pub async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        anyhow::ensure!(self.is_enabled(), "AI provider not configured");

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: GenerateContentResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("empty completion from provider"))?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_service_fails_closed() {
        let service = InsightsService::with_base_url(
            "http://localhost:9".to_string(),
            String::new(),
        );
        assert!(!service.is_enabled());
        let err = service.complete("anything").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn completion_extracts_the_first_candidate_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"^/v1beta/models/.+:generateContent".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"Your funnel converts at 12%."}]}}]}"#,
            )
            .create_async()
            .await;

        let service = InsightsService::with_base_url(server.url(), "test-key".to_string());
        let text = service.complete("analyze my funnel").await.unwrap();

        assert_eq!(text, "Your funnel converts at 12%.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn provider_error_status_is_propagated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"^/v1beta/models/.+:generateContent".to_string()),
            )
            .with_status(429)
            .create_async()
            .await;

        let service = InsightsService::with_base_url(server.url(), "test-key".to_string());
        assert!(service.complete("analyze my funnel").await.is_err());
    }

    #[tokio::test]
    async fn empty_candidate_list_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                mockito::Matcher::Regex(r"^/v1beta/models/.+:generateContent".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"candidates":[]}"#)
            .create_async()
            .await;

        let service = InsightsService::with_base_url(server.url(), "test-key".to_string());
        assert!(service.complete("analyze my funnel").await.is_err());
    }
}
