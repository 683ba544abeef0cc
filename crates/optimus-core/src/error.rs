//! Error taxonomy for the agent core

use optimus_llm::ModelError;
use std::error::Error as StdError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("skill '{0}' is already registered")]
    DuplicateSkill(String),

    #[error("skill '{0}' is not registered")]
    UnknownSkill(String),

    #[error("invalid arguments for skill '{skill}': {reason}")]
    InvalidArguments { skill: String, reason: String },

    #[error("skill '{skill}' failed: {source}")]
    SkillExecution {
        skill: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid plan: {0}")]
    PlanValidation(String),

    #[error("planning unavailable: {0}")]
    PlanningUnavailable(#[source] ModelError),

    /// A model call made while executing a skill failed
    #[error(transparent)]
    ModelUnavailable(#[from] ModelError),

    #[error("memory store {path} is corrupt: {reason}")]
    CorruptMemory { path: PathBuf, reason: String },

    #[error("goal must not be empty")]
    InvalidGoal,

    #[error("memory storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    /// Failures of a single step that the agent loop turns into a replan
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownSkill(_) | Self::InvalidArguments { .. } | Self::SkillExecution { .. }
        )
    }

    /// Full cause chain on one line, for memory details and logs
    pub fn summary(&self) -> String {
        let mut out = self.to_string();
        let mut source = StdError::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !out.contains(&text) {
                out.push_str(": ");
                out.push_str(&text);
            }
            source = StdError::source(cause);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_classification() {
        assert!(AgentError::UnknownSkill("x".into()).is_step_failure());
        assert!(AgentError::SkillExecution {
            skill: "x".into(),
            source: anyhow::anyhow!("boom"),
        }
        .is_step_failure());
        assert!(!AgentError::InvalidGoal.is_step_failure());
        assert!(!AgentError::PlanValidation("empty".into()).is_step_failure());
    }

    #[test]
    fn test_summary_includes_cause() {
        let err = AgentError::SkillExecution {
            skill: "compile".into(),
            source: anyhow::anyhow!("linker missing").context("build step"),
        };
        let summary = err.summary();
        assert!(summary.contains("compile"));
        assert!(summary.contains("linker missing"));
    }
}
