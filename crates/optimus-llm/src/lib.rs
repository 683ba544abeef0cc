//! optimus-llm: language model access for the optimus agent
//!
//! Provides:
//! - The `LanguageModel` port used by the planner and skills
//! - Ollama API client (`/api/generate`)
//! - An explicit mock backend for development
//! - Configuration loading (optimus.toml)

pub mod config;
pub mod mock;
pub mod model;
pub mod ollama;

pub use config::Config;
pub use mock::MockModel;
pub use model::{complete_with_timeout, CompletionOptions, LanguageModel, ModelError};
pub use ollama::{OllamaClient, OllamaStatus};
