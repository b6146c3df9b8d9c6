use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatCandidate, ChatCompletion, CompletionService, RequestSettings, TokenUsage};
use crate::config::CompletionSettings;
use crate::error::{Result, SkeinError};
use crate::transcript::Transcript;

/// Chat service for any endpoint speaking the `/chat/completions` dialect
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleService {
    pub name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    candidates: u32,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl OpenAiCompatibleService {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 2048,
            candidates: 1,
            headers: HashMap::new(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Build from configuration; the API key is read from `api_key_env`
    pub fn from_settings(settings: &CompletionSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let api_key = std::env::var(&settings.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; requests will be sent without authorization",
                settings.api_key_env
            );
        }

        Ok(Self {
            http_client,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            candidates: settings.candidates,
            ..Self::new("openai-compatible", api_key, &settings.base_url, &settings.model)
        })
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, transcript: &Transcript, settings: &RequestSettings) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: settings.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: transcript
                .iter()
                .map(|m| ChatMessage {
                    role: m.role().as_str().to_string(),
                    content: m.content().to_string(),
                })
                .collect(),
            max_tokens: Some(settings.max_tokens.unwrap_or(self.max_tokens)),
            temperature: Some(settings.temperature.unwrap_or(self.temperature)),
            n: Some(settings.candidates.unwrap_or(self.candidates)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

impl From<UsageInfo> for TokenUsage {
    fn from(u: UsageInfo) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
            total_tokens: u.total_tokens.unwrap_or(0),
        }
    }
}

fn into_candidates(response: ChatCompletionResponse) -> Vec<ChatCandidate> {
    let usage: Option<TokenUsage> = response.usage.map(Into::into);
    response
        .choices
        .into_iter()
        .map(|choice| ChatCandidate {
            content: choice.message.content,
            finish_reason: choice.finish_reason,
            usage: usage.clone(),
        })
        .collect()
}

impl CompletionService for OpenAiCompatibleService {
    fn service_id(&self) -> &str {
        &self.name
    }

    fn as_chat(&self) -> Option<&dyn ChatCompletion> {
        Some(self)
    }
}

#[async_trait]
impl ChatCompletion for OpenAiCompatibleService {
    async fn chat_completions(
        &self,
        transcript: &Transcript,
        settings: &RequestSettings,
    ) -> Result<Vec<ChatCandidate>> {
        let request = self.build_request(transcript, settings);

        let mut builder = self
            .http_client
            .post(self.endpoint())
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder.json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SkeinError::Completion(format!(
                "{} API error ({}): {}",
                self.name, status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        Ok(into_candidates(completion))
    }
}
