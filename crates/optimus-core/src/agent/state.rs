//! Agent run state

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::memory::Outcome;
use crate::planner::{Plan, PlanStep};

/// Limits for the agent loop
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Replanning attempts allowed after step failures
    pub max_replans: u32,
    /// Memory entries given to the planner
    pub context_window: usize,
    /// Wall-time limit for one skill dispatch
    pub step_timeout: Option<Duration>,
}

impl AgentConfig {
    pub fn new(max_replans: u32, context_window: usize) -> Self {
        Self {
            max_replans,
            context_window,
            step_timeout: None,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Planning,
    Executing,
    Replanning,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, Failed)
                | (Executing, Executing)
                | (Executing, Replanning)
                | (Executing, Done)
                | (Executing, Failed)
                | (Replanning, Executing)
                | (Replanning, Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Replanning => "REPLANNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Result of one executed step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Planning cycle the step belonged to, starting at 1
    pub cycle: u32,
    pub step: PlanStep,
    pub outcome: Outcome,
}

/// State of a single `run` call. Owned by that call and dropped when it ends.
#[derive(Debug)]
pub(crate) struct AgentRun {
    pub goal: String,
    state: RunState,
    plan: Option<Plan>,
    step_index: usize,
    /// Step failures so far; each one may trigger a replan
    pub attempts: u32,
    pub planning_cycles: u32,
    pub outcomes: Vec<StepOutcome>,
}

impl AgentRun {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            state: RunState::Planning,
            plan: None,
            step_index: 0,
            attempts: 0,
            planning_cycles: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Terminal failure regardless of the current state
    pub fn abort(&mut self) {
        self.state = RunState::Failed;
    }

    /// Replace the plan and restart at its first step
    pub fn start_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.step_index = 0;
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.plan.as_ref().and_then(|plan| plan.get(self.step_index))
    }

    /// Record the current step's outcome and move past it; returns whether
    /// any steps remain
    pub fn complete_step(&mut self, outcome: Outcome) -> bool {
        if let Some(step) = self.current_step().cloned() {
            self.outcomes.push(StepOutcome {
                cycle: self.planning_cycles,
                step,
                outcome,
            });
            self.step_index += 1;
        }
        self.current_step().is_some()
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            replans: self.planning_cycles.saturating_sub(1),
            goal: self.goal,
            final_state: self.state,
            planning_cycles: self.planning_cycles,
            outcomes: self.outcomes,
        }
    }
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub goal: String,
    pub final_state: RunState,
    pub planning_cycles: u32,
    pub replans: u32,
    pub outcomes: Vec<StepOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == RunState::Done
    }

    pub fn failed_steps(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.outcome.is_success()).count()
    }
}
