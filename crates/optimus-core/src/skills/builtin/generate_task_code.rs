//! Code generation skill

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use optimus_llm::{CompletionOptions, LanguageModel};
use serde_json::{json, Value};
use tracing::info;

use crate::error::AgentError;
use crate::skills::{Skill, SkillArgs, SkillOutput, SkillSignature};

/// Asks the language model for code implementing a task description
pub struct GenerateTaskCodeSkill {
    model: Arc<dyn LanguageModel>,
}

impl GenerateTaskCodeSkill {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn build_prompt(description: &str, file_context: Option<(&str, &str)>) -> String {
        let mut prompt = format!(
            "You are an expert software developer. Generate code for the following task:\n\n\
             Task: {}\n",
            description
        );

        if let Some((path, content)) = file_context {
            prompt.push_str(&format!("\nContext from {}:\n```\n{}\n```\n", path, content));
        }

        prompt.push_str(
            "\nInstructions:\n\
             1. Write clean, documented code with error handling where appropriate\n\
             2. If this is a change to existing code, show only the changes needed\n\
             3. If this is a new function, provide the complete implementation\n\n\
             Return ONLY the code, no additional explanation:",
        );
        prompt
    }
}

/// Strip a surrounding markdown fence from a model response
pub(crate) fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[async_trait]
impl Skill for GenerateTaskCodeSkill {
    fn name(&self) -> &str {
        "generate_task_code"
    }

    fn description(&self) -> &str {
        "Generate code for a specific task or improvement"
    }

    fn signature(&self) -> SkillSignature {
        SkillSignature::new()
            .optional("description", "string", "What the code should do", Value::Null)
            .optional("task", "string", "Same as description", Value::Null)
            .optional(
                "context_file",
                "string",
                "File whose content is given as context",
                Value::Null,
            )
            .optional("max_tokens", "number", "Maximum tokens to generate", json!(1024))
    }

    async fn invoke(&self, args: &SkillArgs) -> Result<SkillOutput> {
        let description = args.get("description").filter(|v| !v.is_null());
        let task = args.get("task").filter(|v| !v.is_null());
        let description = match (description, task) {
            (Some(v), None) | (None, Some(v)) => {
                v.as_str().context("description must be a string")?
            }
            _ => anyhow::bail!("exactly one of description or task is required"),
        };
        let max_tokens = args
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(1024) as u32;

        let context_file = args.get("context_file").and_then(|v| v.as_str());
        let file_content = match context_file {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read context file {}", path))?,
            ),
            None => None,
        };
        let file_context = context_file.zip(file_content.as_deref());

        info!(task = %description, "Generating code");
        let prompt = Self::build_prompt(description, file_context);
        let options = CompletionOptions::new(max_tokens, 0.3);
        let response = self
            .model
            .complete(&prompt, &options)
            .await
            .map_err(AgentError::from)?;

        let code = strip_code_fence(&response);
        if code.is_empty() {
            anyhow::bail!("model returned no code");
        }

        Ok(SkillOutput::text(code).with_data(json!({ "chars": code.len() })))
    }
}
