//! Plan generation
//!
//! The planner prompts the language model with the goal, recent memory and
//! the registered skills, then parses the response into a [`Plan`]. It checks
//! that the plan is well formed but not that its skills exist: skills can be
//! hot-loaded between planning and execution, so that check happens at
//! dispatch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use optimus_llm::{complete_with_timeout, CompletionOptions, LanguageModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::memory::{Memory, MemoryEntry};
use crate::skills::registry::SkillRegistry;
use crate::skills::{truncate, SkillArgs};

/// Characters of each argument value shown in a step description
const DESCRIBE_VALUE_LEN: usize = 80;

/// One skill invocation in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub skill_name: String,
    #[serde(default)]
    pub arguments: SkillArgs,
}

impl PlanStep {
    pub fn new(skill_name: impl Into<String>, arguments: SkillArgs) -> Self {
        Self {
            skill_name: skill_name.into(),
            arguments,
        }
    }

    /// Description recorded in memory, e.g. `trace_variable_flow(file=main.py)`
    pub fn describe(&self) -> String {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", name, truncate(&value, DESCRIBE_VALUE_LEN))
            })
            .collect();
        format!("{}({})", self.skill_name, args.join(", "))
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// An ordered, non-empty list of steps. Never modified once built; replanning
/// produces a new plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(AgentError::PlanValidation("plan has no steps".to_string()));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&PlanStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanStep> {
        self.steps.iter()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a PlanStep;
    type IntoIter = std::slice::Iter<'a, PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// Planner settings
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Upper bound on steps per plan
    pub max_steps: usize,
    /// Sampling options for the planning prompt
    pub options: CompletionOptions,
    /// Wall-time limit for one completion
    pub timeout: Option<Duration>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            options: CompletionOptions::new(1024, 0.3),
            timeout: None,
        }
    }
}

impl PlannerConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Turns a goal and its recent memory into a plan
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    config: PlannerConfig,
    skills: Option<Arc<SkillRegistry>>,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>, config: PlannerConfig) -> Self {
        Self {
            model,
            config,
            skills: None,
        }
    }

    /// List the skills of `registry` in planning prompts
    pub fn with_skills(mut self, registry: Arc<SkillRegistry>) -> Self {
        self.skills = Some(registry);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Ask the model for a plan.
    ///
    /// Fails with `PlanningUnavailable` when the model errors or times out and
    /// with `PlanValidation` when the response is not a usable plan.
    pub async fn generate_plan(&self, goal: &str, context: &[MemoryEntry]) -> Result<Plan> {
        let prompt = self.build_prompt(goal, context);
        debug!(model = self.model.name(), prompt_len = prompt.len(), "Requesting plan");

        let completion = match self.config.timeout {
            Some(limit) => {
                let options = &self.config.options;
                complete_with_timeout(self.model.as_ref(), &prompt, options, limit).await
            }
            None => self.model.complete(&prompt, &self.config.options).await,
        };
        let response = completion.map_err(|e| {
            warn!(error = %e, "Language model unavailable for planning");
            AgentError::PlanningUnavailable(e)
        })?;
        debug!(response = %response, "Planner raw response");

        let plan = parse_plan(&response, self.config.max_steps)?;
        info!(goal = %goal, steps = plan.len(), "Generated plan");
        Ok(plan)
    }

    fn build_prompt(&self, goal: &str, context: &[MemoryEntry]) -> String {
        let mut prompt = format!(
            "You are Optimus, a coding agent that improves and analyzes code.\n\n\
             Goal: {}\n\n\
             Prior context from memory:\n{}\n",
            goal,
            Memory::format_context(context)
        );

        if let Some(registry) = &self.skills {
            prompt.push_str("\nAvailable skills:\n");
            for info in registry.describe() {
                prompt.push_str(&format!(
                    "- {}({}): {}\n",
                    info.name,
                    info.signature.render(),
                    info.description
                ));
            }
        }

        prompt.push_str(&format!(
            "\nCreate a step-by-step plan to achieve the goal. \
             Respond with a JSON array of at most {} steps.\n\
             Each step has this shape:\n\
             {{\"skill_name\": \"<skill>\", \"arguments\": {{\"<parameter>\": <value>}}}}\n\n\
             Example:\n\
             [\n\
             \x20   {{\"skill_name\": \"generate_task_code\", \"arguments\": \
             {{\"description\": \"add input validation to parse_args\"}}}},\n\
             \x20   {{\"skill_name\": \"trace_variable_flow\", \"arguments\": \
             {{\"file\": \"src/main.py\", \"variable\": \"args\"}}}}\n\
             ]\n\n\
             Rules:\n\
             - Only use the available skills\n\
             - Be specific with arguments\n\
             - If earlier steps failed, take the failure into account\n\
             - Return valid JSON only\n\n\
             Plan:",
            self.config.max_steps
        ));
        prompt
    }
}

/// Step as produced by the model; `action`/`params` are accepted aliases
#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(alias = "action")]
    skill_name: String,
    #[serde(default, alias = "params")]
    arguments: Option<Value>,
}

/// Parse and validate a model response
pub fn parse_plan(response: &str, max_steps: usize) -> Result<Plan> {
    let items = extract_json_array(response).ok_or_else(|| {
        AgentError::PlanValidation("response does not contain a JSON array of steps".to_string())
    })?;

    if items.is_empty() {
        return Err(AgentError::PlanValidation("plan has no steps".to_string()));
    }
    if items.len() > max_steps {
        return Err(AgentError::PlanValidation(format!(
            "plan has {} steps, the maximum is {}",
            items.len(),
            max_steps
        )));
    }

    let mut steps = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let raw: RawStep = serde_json::from_value(item).map_err(|e| {
            AgentError::PlanValidation(format!("step {} is malformed: {}", idx + 1, e))
        })?;

        let skill_name = raw.skill_name.trim().to_string();
        if skill_name.is_empty() {
            return Err(AgentError::PlanValidation(format!(
                "step {} has an empty skill name",
                idx + 1
            )));
        }

        let arguments = match raw.arguments {
            None | Some(Value::Null) => SkillArgs::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(AgentError::PlanValidation(format!(
                    "step {} arguments must be an object, got {}",
                    idx + 1,
                    other
                )))
            }
        };

        steps.push(PlanStep::new(skill_name, arguments));
    }

    Plan::new(steps)
}

/// Find the JSON array in a response: the whole text, a fenced block, or the
/// span from the first `[` to the last `]`
fn extract_json_array(response: &str) -> Option<Vec<Value>> {
    let trimmed = response.trim();

    let mut candidates = vec![trimmed];
    if let Some(fenced) = extract_json_from_markdown(trimmed) {
        candidates.push(fenced);
    }
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    candidates
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        })
}

fn extract_json_from_markdown(content: &str) -> Option<&str> {
    for pattern in ["```json\n", "```JSON\n", "```\n"] {
        if let Some(start) = content.find(pattern) {
            let json_start = start + pattern.len();
            if let Some(end) = content[json_start..].find("```") {
                return Some(content[json_start..json_start + end].trim());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Outcome;
    use crate::skills::{FnSkill, SkillOutput, SkillSignature};
    use async_trait::async_trait;
    use optimus_llm::ModelError;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Returns `response` and remembers the prompt it was given
    struct RecordingModel {
        response: std::result::Result<String, ModelError>,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingModel {
        fn new(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: ModelError) -> Self {
            Self {
                response: Err(error),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> std::result::Result<String, ModelError> {
            self.prompts.lock().push(prompt.to_string());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(ModelError::Unavailable(msg)) => Err(ModelError::Unavailable(msg.clone())),
                Err(other) => Err(ModelError::Request(other.to_string())),
            }
        }
    }

    #[test]
    fn test_parse_raw_array() {
        let plan = parse_plan(
            r#"[{"skill_name": "generate_task_code",
                "arguments": {"description": "hello world function"}}]"#,
            10,
        )
        .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].skill_name, "generate_task_code");
        assert_eq!(plan.steps()[0].arguments["description"], json!("hello world function"));
    }

    #[test]
    fn test_parse_fenced_and_embedded() {
        let fenced = "Here is the plan:\n```json\n[{\"skill_name\": \"a\"}]\n```\nDone.";
        assert_eq!(parse_plan(fenced, 10).unwrap().steps()[0].skill_name, "a");

        let embedded = "Plan: [{\"action\": \"b\", \"params\": {\"x\": 1}}] hope this helps";
        let plan = parse_plan(embedded, 10).unwrap();
        assert_eq!(plan.steps()[0].skill_name, "b");
        assert_eq!(plan.steps()[0].arguments["x"], json!(1));
    }

    #[test]
    fn test_parse_rejects_bad_plans() {
        for response in [
            "no json here",
            "[]",
            r#"{"skill_name": "a"}"#,
            r#"[{"arguments": {}}]"#,
            r#"[{"skill_name": "  "}]"#,
            r#"[{"skill_name": "a", "arguments": "file=x"}]"#,
            r#"["just a string"]"#,
        ] {
            let err = parse_plan(response, 10).unwrap_err();
            assert!(matches!(err, AgentError::PlanValidation(_)), "accepted: {response}");
        }
    }

    #[test]
    fn test_parse_enforces_max_steps() {
        let response = json!([
            {"skill_name": "a"}, {"skill_name": "b"}, {"skill_name": "c"}
        ])
        .to_string();

        assert!(parse_plan(&response, 3).is_ok());
        let err = parse_plan(&response, 2).unwrap_err();
        assert!(err.to_string().contains("maximum is 2"));
    }

    #[test]
    fn test_parse_does_not_check_skill_existence() {
        let plan = parse_plan(r#"[{"skill_name": "nonexistent_skill"}]"#, 10).unwrap();
        assert_eq!(plan.steps()[0].skill_name, "nonexistent_skill");
        assert!(plan.steps()[0].arguments.is_empty());
    }

    #[test]
    fn test_describe_step() {
        let step = PlanStep::new(
            "trace_variable_flow",
            json!({"file": "main.py", "variable": null}).as_object().cloned().unwrap(),
        );
        assert_eq!(step.describe(), "trace_variable_flow(file=main.py, variable=null)");
        assert_eq!(PlanStep::new("noop", SkillArgs::new()).to_string(), "noop()");
    }

    #[tokio::test]
    async fn test_prompt_includes_goal_context_and_skills() {
        let registry = Arc::new(SkillRegistry::new());
        registry
            .register(FnSkill::new(
                "generate_task_code",
                "Generate code",
                SkillSignature::new().required("description", "string", "What to build"),
                |_| Ok(SkillOutput::text("")),
            ))
            .unwrap();

        let memory = Memory::in_memory();
        memory
            .record("g", "generate_task_code(description=x)", Outcome::failure("model timed out"))
            .unwrap();

        let model = Arc::new(RecordingModel::new(r#"[{"skill_name": "generate_task_code"}]"#));
        let planner = Planner::new(model.clone(), PlannerConfig::default()).with_skills(registry);
        planner.generate_plan("g", &memory.retrieve("g")).await.unwrap();

        let prompts = model.prompts.lock();
        let prompt = &prompts[0];
        assert!(prompt.contains("Goal: g"));
        assert!(prompt.contains("[failure] model timed out"));
        assert!(prompt.contains("- generate_task_code(description: string): Generate code"));
    }

    #[tokio::test]
    async fn test_model_failure_is_planning_unavailable() {
        let refused = ModelError::Unavailable("connection refused".into());
        let model = Arc::new(RecordingModel::failing(refused));
        let planner = Planner::new(model, PlannerConfig::default());

        let err = planner.generate_plan("g", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanningUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_response_is_plan_validation() {
        let model = Arc::new(RecordingModel::new("I cannot help"));
        let planner = Planner::new(model, PlannerConfig::default());
        let err = planner.generate_plan("g", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanValidation(_)));
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        struct SlowModel;

        #[async_trait]
        impl LanguageModel for SlowModel {
            fn name(&self) -> &str {
                "slow"
            }

            async fn complete(
                &self,
                _prompt: &str,
                _options: &CompletionOptions,
            ) -> std::result::Result<String, ModelError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("[]".to_string())
            }
        }

        let config = PlannerConfig::default().with_timeout(Duration::from_millis(20));
        let planner = Planner::new(Arc::new(SlowModel), config);

        let err = planner.generate_plan("g", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::PlanningUnavailable(ModelError::Timeout(_))));
    }
}
