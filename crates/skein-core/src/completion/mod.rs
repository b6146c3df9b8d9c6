//! Completion Invoker
//!
//! Sends a [`Transcript`] to a chat-capable completion service and extracts
//! the primary response. Chat support is a capability query
//! ([`CompletionService::as_chat`]) made once at this boundary.

pub mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};
use crate::transcript::Transcript;

/// Metadata key under which the raw completion candidates are stored
pub const MODEL_RESULTS_METADATA_KEY: &str = "model_results";

/// An externally supplied completion capability
pub trait CompletionService: Send + Sync {
    /// Identifier used in logs and errors
    fn service_id(&self) -> &str;

    /// Chat capability, if the service has one
    fn as_chat(&self) -> Option<&dyn ChatCompletion> {
        None
    }
}

/// Chat-style completion over a role-tagged transcript
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Returns every candidate produced for the transcript, best first
    async fn chat_completions(
        &self,
        transcript: &Transcript,
        settings: &RequestSettings,
    ) -> Result<Vec<ChatCandidate>>;
}

/// Per-request generation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSettings {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Number of candidates to request
    #[serde(default)]
    pub candidates: Option<u32>,
}

impl RequestSettings {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_candidates(mut self, candidates: u32) -> Self {
        self.candidates = Some(candidates);
        self
    }
}

/// One completion candidate as returned by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCandidate {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ChatCandidate {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
            usage: None,
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Primary text plus the raw candidates it was selected from
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub candidates: Vec<ChatCandidate>,
}

impl Completion {
    /// Raw candidates as a metadata value
    pub fn model_results(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.candidates)?)
    }
}

/// Invoke the chat capability of `service` and select the first candidate.
pub async fn complete_chat(
    service: &dyn CompletionService,
    transcript: &Transcript,
    settings: &RequestSettings,
) -> Result<Completion> {
    let chat = service
        .as_chat()
        .ok_or_else(|| SkeinError::UnsupportedService(service.service_id().to_string()))?;

    tracing::debug!(
        service = service.service_id(),
        messages = transcript.len(),
        "Requesting chat completion"
    );

    let candidates = chat.chat_completions(transcript, settings).await?;
    let text = candidates
        .first()
        .map(|c| c.content.clone())
        .ok_or_else(|| {
            SkeinError::Completion(format!(
                "service '{}' returned no candidates",
                service.service_id()
            ))
        })?;

    tracing::debug!(
        service = service.service_id(),
        candidates = candidates.len(),
        "Chat completion received"
    );

    Ok(Completion { text, candidates })
}
