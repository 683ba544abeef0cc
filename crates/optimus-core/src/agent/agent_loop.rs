//! Agent loop execution

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::state::{AgentConfig, AgentRun, RunReport, RunState};
use crate::error::{AgentError, Result};
use crate::memory::{Memory, MemoryStats, Outcome};
use crate::planner::{PlanStep, Planner};
use crate::skills::registry::SkillRegistry;
use crate::skills::SkillOutput;

/// Step description recorded when no plan could be produced
const PLAN_GENERATION: &str = "plan generation";

/// Number of goals reported by `status`
const RECENT_GOALS: usize = 5;

/// Snapshot of the agent for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub memory: MemoryStats,
    pub skills: Vec<String>,
    pub recent_goals: Vec<String>,
}

/// The agent loop
pub struct AgentLoop {
    planner: Planner,
    registry: Arc<SkillRegistry>,
    memory: Arc<Memory>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        planner: Planner,
        registry: Arc<SkillRegistry>,
        memory: Arc<Memory>,
        config: AgentConfig,
    ) -> Self {
        Self {
            planner,
            registry,
            memory,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run `goal` to completion; true when every step of the final plan succeeded
    pub async fn run_agent(&self, goal: &str) -> Result<bool> {
        Ok(self.run(goal).await?.succeeded())
    }

    /// Run `goal` until it is done or has failed.
    ///
    /// Step and planning failures end up in memory and in the report; only an
    /// empty goal or a memory write failure is returned as an error.
    #[instrument(skip(self))]
    pub async fn run(&self, goal: &str) -> Result<RunReport> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::InvalidGoal);
        }

        info!(max_replans = self.config.max_replans, "Starting agent run");
        let mut run = AgentRun::new(goal);

        loop {
            match run.state() {
                RunState::Planning | RunState::Replanning => self.plan(&mut run).await?,
                RunState::Executing => self.execute_step(&mut run).await?,
                RunState::Done | RunState::Failed => break,
            }
        }

        let report = run.into_report();
        info!(
            state = %report.final_state,
            planning_cycles = report.planning_cycles,
            steps = report.outcomes.len(),
            failed = report.failed_steps(),
            "Agent run finished"
        );
        Ok(report)
    }

    /// Build a plan from fresh memory context
    async fn plan(&self, run: &mut AgentRun) -> Result<()> {
        run.planning_cycles += 1;
        let context = self
            .memory
            .get_recent_context(&run.goal, self.config.context_window);
        debug!(cycle = run.planning_cycles, context = context.len(), "Planning");

        match self.planner.generate_plan(&run.goal, &context).await {
            Ok(plan) => {
                for (i, step) in plan.iter().enumerate() {
                    info!(step = i + 1, total = plan.len(), "Planned {}", step);
                }
                run.start_plan(plan);
                enter(run, RunState::Executing);
            }
            Err(e) => {
                warn!(error = %e, "Plan generation failed");
                self.memory
                    .record(&run.goal, PLAN_GENERATION, Outcome::failure(e.summary()))?;
                enter(run, RunState::Failed);
            }
        }
        Ok(())
    }

    /// Dispatch the current step and record its outcome
    async fn execute_step(&self, run: &mut AgentRun) -> Result<()> {
        let Some(step) = run.current_step().cloned() else {
            enter(run, RunState::Done);
            return Ok(());
        };
        let description = step.describe();
        info!(step = %description, "Executing step");

        match self.dispatch(&step).await {
            Ok(output) => {
                let outcome = Outcome::success(output.summary());
                self.memory.record(&run.goal, &description, outcome.clone())?;
                info!(result = %outcome.detail, "Step completed");

                let next = if run.complete_step(outcome) {
                    RunState::Executing
                } else {
                    RunState::Done
                };
                enter(run, next);
            }
            Err(e) if e.is_step_failure() => {
                let outcome = Outcome::failure(e.summary());
                self.memory.record(&run.goal, &description, outcome.clone())?;
                run.complete_step(outcome);

                run.attempts += 1;
                if run.attempts <= self.config.max_replans {
                    warn!(error = %e, attempt = run.attempts, "Step failed, replanning");
                    enter(run, RunState::Replanning);
                } else {
                    warn!(error = %e, attempts = run.attempts, "Step failed, no replans left");
                    enter(run, RunState::Failed);
                }
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn dispatch(&self, step: &PlanStep) -> Result<SkillOutput> {
        match self.config.step_timeout {
            Some(limit) => {
                self.registry
                    .dispatch_with_timeout(&step.skill_name, &step.arguments, limit)
                    .await
            }
            None => self.registry.dispatch(&step.skill_name, &step.arguments).await,
        }
    }

    /// Memory statistics, registered skills and the latest goals
    pub fn status(&self) -> AgentStatus {
        let goals = self.memory.goals();
        let start = goals.len().saturating_sub(RECENT_GOALS);
        AgentStatus {
            memory: self.memory.stats(),
            skills: self.registry.list_names(),
            recent_goals: goals[start..].to_vec(),
        }
    }
}

fn enter(run: &mut AgentRun, next: RunState) {
    if let Err(e) = run.transition(next) {
        error!(error = %e, "Aborting run");
        run.abort();
    }
}
