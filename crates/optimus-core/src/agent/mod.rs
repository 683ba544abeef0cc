//! The agent loop: plan, execute, record, replan

mod agent_loop;
mod state;

pub use agent_loop::{AgentLoop, AgentStatus};
pub use state::{AgentConfig, IllegalTransition, RunReport, RunState, StepOutcome};
