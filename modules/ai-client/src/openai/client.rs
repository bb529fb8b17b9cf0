use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::types::{ChatMessage, ChatRequest, ChatResponse};
use crate::traits::TextModel;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Rate-limit retries. Malformed-content retry is the caller's policy;
/// 429 backoff is a transport concern and lives here.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiModel {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiModel {
    pub fn new(api_key: &str, model: &str, temperature: f32) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.to_string(),
            temperature,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        for attempt in 1..=MAX_RATE_LIMIT_RETRIES {
            debug!(model = %request.model, attempt, "Chat request");

            let response = self
                .http
                .post(&url)
                .headers(self.headers()?)
                .json(request)
                .send()
                .await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = RATE_LIMIT_RETRY_DELAY * attempt;
                warn!(wait_secs = wait.as_secs(), "Rate limited, backing off");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await?;
                return Err(anyhow!("Chat API error ({}): {}", status, error_text));
            }

            let chat: ChatResponse = response.json().await?;
            return chat
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| anyhow!("Chat API returned no content"));
        }

        Err(anyhow!("Chat API rate limited after {MAX_RATE_LIMIT_RETRIES} attempts"))
    }
}

#[async_trait]
impl TextModel for OpenAiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.temperature,
        };
        self.chat(&request).await
    }
}
