//! optimus-core: the control core of the optimus coding agent
//!
//! A goal is turned into a [`planner::Plan`] by prompting a language model,
//! the plan's steps are dispatched through the [`skills::SkillRegistry`], and
//! every outcome is appended to [`memory::Memory`] so later runs can build on
//! earlier ones. [`agent::AgentLoop`] ties these together and replans on
//! failure a bounded number of times.

pub mod agent;
pub mod error;
pub mod memory;
pub mod planner;
pub mod skills;

pub use agent::{AgentConfig, AgentLoop, AgentStatus, RunReport, RunState};
pub use error::{AgentError, Result};
pub use memory::{Memory, MemoryEntry, MemoryStats, Outcome, OutcomeStatus};
pub use planner::{Plan, PlanStep, Planner, PlannerConfig};
pub use skills::registry::SkillRegistry;
pub use skills::{Skill, SkillArgs, SkillOutput, SkillParameter, SkillSignature};
