//! Configuration management for optimus.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::mock::MockModel;
use crate::model::{CompletionOptions, LanguageModel};
use crate::ollama::OllamaClient;

/// Name of the configuration file searched for
pub const CONFIG_FILE: &str = "optimus.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    pub agent: AgentSettings,
    #[serde(default)]
    pub skills: SkillsConfig,
}

/// Which backend serves completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ollama,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Model path or identifier
    pub name: String,
    /// Embedding model identifier (reserved for semantic recall)
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
}

/// Agent loop limits. `max_replans` and `context_window` have no defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    pub max_replans: u32,
    pub context_window: usize,
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillsConfig {
    /// Directory of skill manifests
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Reload manifests when they change on disk
    #[serde(default)]
    pub watch: bool,
}

fn default_backend() -> Backend {
    Backend::Ollama
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_model_timeout() -> u64 {
    300
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("data/memory.json")
}

fn default_max_plan_steps() -> usize {
    10
}

fn default_step_timeout() -> u64 {
    120
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
        }
    }
}

impl Config {
    /// Load configuration from optimus.toml
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_path()?)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Find optimus.toml by searching current directory and parents
    pub fn find_config_path() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        anyhow::bail!("{} not found in current directory or parents", CONFIG_FILE)
    }

    /// Apply MODEL_PATH, EMBEDDING_MODEL and OPTIMUS_MEMORY_PATH overrides
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("MODEL_PATH") {
            self.model.name = model;
        }
        if let Some(embedding) = lookup("EMBEDDING_MODEL") {
            self.model.embedding_model = Some(embedding);
        }
        if let Some(path) = lookup("OPTIMUS_MEMORY_PATH") {
            self.memory.path = PathBuf::from(path);
        }
    }

    /// Get Ollama base URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.model.host, self.model.port)
    }

    /// Default sampling options for completions
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::new(self.model.max_tokens, self.model.temperature)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.step_timeout_secs)
    }

    /// Build the configured language model backend
    pub fn build_model(&self) -> Arc<dyn LanguageModel> {
        match self.model.backend {
            Backend::Ollama => Arc::new(OllamaClient::new(
                self.ollama_url(),
                self.model.name.clone(),
                Duration::from_secs(self.model.timeout_secs),
            )),
            Backend::Mock => Arc::new(MockModel::new()),
        }
    }

    /// Template written by `optimus init`
    pub fn template() -> &'static str {
        r#"# optimus configuration

[model]
# "ollama" or "mock" (canned responses, development only)
backend = "ollama"
host = "127.0.0.1"
port = 11434
# Model path or identifier (overridden by MODEL_PATH)
name = "mistral"
# embedding_model = "sentence-transformers/all-MiniLM-L6-v2"
max_tokens = 512
temperature = 0.7
timeout_secs = 300

[memory]
path = "data/memory.json"

[agent]
# How many times a failed plan may be regenerated
max_replans = 2
# How many recent memory entries are given to the planner
context_window = 5
max_plan_steps = 10
step_timeout_secs = 120

[skills]
# Directory of *.toml skill manifests
# dir = "skills"
watch = false
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[model]
name = "mistral"

[agent]
max_replans = 1
context_window = 3
"#;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.model.backend, Backend::Ollama);
        assert_eq!(config.model.port, 11434);
        assert_eq!(config.agent.max_replans, 1);
        assert_eq!(config.agent.context_window, 3);
        assert_eq!(config.agent.max_plan_steps, 10);
        assert_eq!(config.memory.path, PathBuf::from("data/memory.json"));
        assert!(config.skills.dir.is_none());
        assert_eq!(config.ollama_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_agent_limits_are_required() {
        let toml = r#"
[model]
name = "mistral"

[agent]
context_window = 3
"#;
        let err = toml::from_str::<Config>(toml).unwrap_err();
        assert!(err.to_string().contains("max_replans"));
    }

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(Config::template()).unwrap();
        assert_eq!(config.agent.max_replans, 2);
        assert_eq!(config.agent.context_window, 5);
        assert!(!config.skills.watch);
    }

    #[test]
    fn test_env_overrides() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("MODEL_PATH", "/models/mistral.gguf"),
            ("EMBEDDING_MODEL", "all-MiniLM-L6-v2"),
            ("OPTIMUS_MEMORY_PATH", "/tmp/mem.json"),
        ]
        .into_iter()
        .collect();

        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.model.name, "/models/mistral.gguf");
        assert_eq!(config.model.embedding_model.as_deref(), Some("all-MiniLM-L6-v2"));
        assert_eq!(config.memory.path, PathBuf::from("/tmp/mem.json"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[model]\nname = \"x\"\nbackend = \"mock\"\n\
             [agent]\nmax_replans = 0\ncontext_window = 1\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model.backend, Backend::Mock);
        assert_eq!(config.agent.max_replans, 0);
    }
}
