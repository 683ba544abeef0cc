//! Deterministic stand-in for a real model
//!
//! Only used when `backend = "mock"` is configured. It is never substituted
//! for a failing backend.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::{CompletionOptions, LanguageModel, ModelError};

const MOCK_PLAN: &str = r#"[
    {"skill_name": "generate_task_code", "arguments": {"description": "improve error handling"}}
]"#;

const MOCK_TEXT: &str =
    "This is a mock response. Configure an Ollama model to get real completions.";

/// Mock language model with canned answers
#[derive(Debug, Clone)]
pub struct MockModel {
    name: String,
}

impl MockModel {
    pub fn new() -> Self {
        warn!("Using the mock language model; completions are canned responses");
        Self {
            name: "mock".to_string(),
        }
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        let lower = prompt.to_lowercase();
        let planning = lower.contains("step-by-step plan") || lower.contains("json array");
        debug!(planning, prompt_len = prompt.len(), "Mock completion");

        if planning {
            Ok(MOCK_PLAN.to_string())
        } else {
            Ok(MOCK_TEXT.to_string())
        }
    }
}
