//! The language model port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a language model backend
#[derive(Debug, Error)]
pub enum ModelError {
    /// The backend cannot be reached or has no model loaded
    #[error("language model unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with an error status
    #[error("language model request failed: {0}")]
    Request(String),
    /// The call did not finish in time
    #[error("language model timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered with something we could not decode
    #[error("invalid language model response: {0}")]
    InvalidResponse(String),
}

/// Sampling options for a single completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            stop: Vec::new(),
        }
    }
}

impl CompletionOptions {
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            stop: Vec::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// A text completion backend.
///
/// Implementations must be safe to share between tasks, but callers treat a
/// model as a singleton and never issue concurrent completions for one run.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Backend identifier, used in logs
    fn name(&self) -> &str;

    /// Complete `prompt` and return the generated text
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError>;
}

/// Run a completion with an upper bound on wall time
pub async fn complete_with_timeout(
    model: &dyn LanguageModel,
    prompt: &str,
    options: &CompletionOptions,
    limit: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(limit, model.complete(prompt, options)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout(limit)),
    }
}
