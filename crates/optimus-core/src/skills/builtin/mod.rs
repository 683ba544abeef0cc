//! Built-in skills

mod generate_task_code;
mod trace_variable_flow;

pub use generate_task_code::GenerateTaskCodeSkill;
pub use trace_variable_flow::TraceVariableFlowSkill;

use std::sync::Arc;

use optimus_llm::LanguageModel;

use super::registry::SkillRegistry;
use crate::error::Result;

/// Register the built-in skills
pub fn register_builtins(registry: &SkillRegistry, model: Arc<dyn LanguageModel>) -> Result<()> {
    registry.register(GenerateTaskCodeSkill::new(model))?;
    registry.register(TraceVariableFlowSkill)?;
    Ok(())
}
