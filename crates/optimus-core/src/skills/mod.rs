//! Skill framework for plan execution
//!
//! A skill is a named capability with a declared argument signature. Plans
//! refer to skills by name; the registry resolves and invokes them.

pub mod builtin;
pub mod discovery;
pub mod registry;
pub mod watcher;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Named arguments passed to a skill
pub type SkillArgs = Map<String, Value>;

/// Maximum characters kept when summarizing output for memory
const SUMMARY_LEN: usize = 200;

/// Result of a skill invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    /// Human readable output
    pub output: String,
    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SkillOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Output shortened for memory entries and logs
    pub fn summary(&self) -> String {
        truncate(&self.output, SUMMARY_LEN)
    }
}

/// Truncate on a char boundary, marking the cut with "..."
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// One declared parameter of a skill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillParameter {
    pub name: String,
    /// Parameter type (string, number, boolean, array, object)
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    /// Parameters with a default are optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl SkillParameter {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Declared parameters of a skill, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillSignature {
    pub parameters: Vec<SkillParameter>,
}

impl SkillSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter that must be supplied
    pub fn required(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(SkillParameter {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            default: None,
        });
        self
    }

    /// Add a parameter that falls back to `default` when omitted
    pub fn optional(
        mut self,
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
        default: Value,
    ) -> Self {
        self.parameters.push(SkillParameter {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            default: Some(default),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&SkillParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Reject empty or duplicated parameter names
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                return Err("parameter with empty name".to_string());
            }
            if !seen.insert(param.name.as_str()) {
                return Err(format!("parameter '{}' declared twice", param.name));
            }
        }
        Ok(())
    }

    /// Check `args` against the signature and fill in declared defaults.
    ///
    /// Keys not declared are rejected, as are required parameters that are
    /// missing.
    pub fn bind(&self, args: &SkillArgs) -> std::result::Result<SkillArgs, String> {
        let mut unexpected: Vec<&str> = args
            .keys()
            .filter(|k| self.get(k).is_none())
            .map(|k| k.as_str())
            .collect();
        if !unexpected.is_empty() {
            unexpected.sort_unstable();
            return Err(format!("unexpected argument(s): {}", unexpected.join(", ")));
        }

        let missing: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.is_required() && !args.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required argument(s): {}", missing.join(", ")));
        }

        let mut bound = args.clone();
        for param in &self.parameters {
            if let Some(default) = &param.default {
                bound
                    .entry(param.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        Ok(bound)
    }

    /// Compact form used in prompts: `name: type, opt: type = default`
    pub fn render(&self) -> String {
        self.parameters
            .iter()
            .map(|p| match &p.default {
                Some(d) => format!("{}: {} = {}", p.name, p.param_type, d),
                None => format!("{}: {}", p.name, p.param_type),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Introspection record for a registered skill
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub signature: SkillSignature,
}

/// The trait every skill implements
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique skill name
    fn name(&self) -> &str;

    /// What the skill does, shown to the planner
    fn description(&self) -> &str;

    /// Declared parameters
    fn signature(&self) -> SkillSignature;

    /// Run the skill. `args` has already been checked against the signature.
    async fn invoke(&self, args: &SkillArgs) -> Result<SkillOutput>;

    fn info(&self) -> SkillInfo {
        SkillInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
            signature: self.signature(),
        }
    }
}

type SkillFn = dyn Fn(&SkillArgs) -> Result<SkillOutput> + Send + Sync;

/// A skill backed by a plain closure
pub struct FnSkill {
    name: String,
    description: String,
    signature: SkillSignature,
    func: Box<SkillFn>,
}

impl FnSkill {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        signature: SkillSignature,
        func: F,
    ) -> Self
    where
        F: Fn(&SkillArgs) -> Result<SkillOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            signature,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Skill for FnSkill {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn signature(&self) -> SkillSignature {
        self.signature.clone()
    }

    async fn invoke(&self, args: &SkillArgs) -> Result<SkillOutput> {
        (self.func)(args)
    }
}

impl std::fmt::Debug for FnSkill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSkill")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> SkillArgs {
        value.as_object().cloned().unwrap()
    }

    fn signature() -> SkillSignature {
        SkillSignature::new()
            .required("file", "string", "File to inspect")
            .optional("depth", "number", "How deep to look", json!(2))
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = signature().bind(&args(json!({"file": "main.rs"}))).unwrap();
        assert_eq!(bound["file"], "main.rs");
        assert_eq!(bound["depth"], 2);
    }

    #[test]
    fn test_bind_keeps_explicit_value() {
        let bound = signature()
            .bind(&args(json!({"file": "main.rs", "depth": 5})))
            .unwrap();
        assert_eq!(bound["depth"], 5);
    }

    #[test]
    fn test_bind_rejects_extra_keys() {
        let err = signature()
            .bind(&args(json!({"file": "a", "colour": "red"})))
            .unwrap_err();
        assert!(err.contains("colour"));
    }

    #[test]
    fn test_bind_rejects_missing_required() {
        let err = signature().bind(&SkillArgs::new()).unwrap_err();
        assert!(err.contains("file"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let sig = SkillSignature::new()
            .required("a", "string", "")
            .required("a", "string", "");
        assert!(sig.validate().is_err());
        assert!(signature().validate().is_ok());
    }

    #[test]
    fn test_render() {
        assert_eq!(signature().render(), "file: string, depth: number = 2");
    }

    #[test]
    fn test_summary_truncates() {
        let long = "x".repeat(500);
        let summary = SkillOutput::text(long).summary();
        assert_eq!(summary.len(), SUMMARY_LEN + 3);
        assert!(summary.ends_with("..."));
    }

    #[tokio::test]
    async fn test_fn_skill_invokes_closure() {
        let signature = SkillSignature::new().required("text", "string", "");
        let skill = FnSkill::new("echo", "Echo input", signature, |a| {
            Ok(SkillOutput::text(a["text"].as_str().unwrap_or_default()))
        });

        let out = skill.invoke(&args(json!({"text": "hi"}))).await.unwrap();
        assert_eq!(out.output, "hi");
        assert_eq!(skill.info().name, "echo");
    }
}
