//! Skill registry with hot replacement
//!
//! Lookups clone an `Arc` snapshot under a read lock, so a dispatch that is
//! already running keeps the skill it started with while `reload` swaps in a
//! new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use super::{Skill, SkillArgs, SkillInfo, SkillOutput};
use crate::error::{AgentError, Result};

#[derive(Default)]
struct Entries {
    skills: HashMap<String, Arc<dyn Skill>>,
    /// Registration order, for deterministic listing
    order: Vec<String>,
}

/// Registry of available skills
#[derive(Default)]
pub struct SkillRegistry {
    entries: RwLock<Entries>,
}

impl SkillRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill, failing if the name is taken
    pub fn register<S: Skill + 'static>(&self, skill: S) -> Result<()> {
        self.register_arc(Arc::new(skill), false)
    }

    /// Register a skill, replacing an existing one when `overwrite` is set
    pub fn register_with<S: Skill + 'static>(&self, skill: S, overwrite: bool) -> Result<()> {
        self.register_arc(Arc::new(skill), overwrite)
    }

    pub fn register_arc(&self, skill: Arc<dyn Skill>, overwrite: bool) -> Result<()> {
        let name = skill.name().to_string();
        check_signature(skill.as_ref())?;

        let mut entries = self.entries.write();
        if entries.skills.contains_key(&name) {
            if !overwrite {
                return Err(AgentError::DuplicateSkill(name));
            }
        } else {
            entries.order.push(name.clone());
        }
        entries.skills.insert(name.clone(), skill);
        debug!(skill = %name, overwrite, "Registered skill");
        Ok(())
    }

    /// Replace an existing skill. Reload never registers a new name.
    pub fn reload<S: Skill + 'static>(&self, skill: S) -> Result<()> {
        self.reload_arc(Arc::new(skill))
    }

    pub fn reload_arc(&self, skill: Arc<dyn Skill>) -> Result<()> {
        let name = skill.name().to_string();
        check_signature(skill.as_ref())?;

        let mut entries = self.entries.write();
        match entries.skills.get_mut(&name) {
            Some(slot) => {
                *slot = skill;
                info!(skill = %name, "Reloaded skill");
                Ok(())
            }
            None => Err(AgentError::UnknownSkill(name)),
        }
    }

    /// Remove a skill; returns whether it was present
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.skills.remove(name).is_some();
        if removed {
            entries.order.retain(|n| n != name);
            info!(skill = %name, "Unregistered skill");
        }
        removed
    }

    /// Get a skill by name
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Skill>> {
        self.entries
            .read()
            .skills
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownSkill(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().skills.contains_key(name)
    }

    /// Registered names in registration order
    pub fn list_names(&self) -> Vec<String> {
        self.entries.read().order.clone()
    }

    /// Name, description and signature of every skill, in registration order
    pub fn describe(&self) -> Vec<SkillInfo> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|name| entries.skills.get(name))
            .map(|skill| skill.info())
            .collect()
    }

    /// Look up a skill, check the arguments and invoke it
    #[instrument(skip(self, args), fields(skill = %name))]
    pub async fn dispatch(&self, name: &str, args: &SkillArgs) -> Result<SkillOutput> {
        let skill = self.lookup(name)?;

        let bound = skill
            .signature()
            .bind(args)
            .map_err(|reason| AgentError::InvalidArguments {
                skill: name.to_string(),
                reason,
            })?;

        debug!(args = bound.len(), "Invoking skill");
        match skill.invoke(&bound).await {
            Ok(output) => {
                debug!(output_len = output.output.len(), "Skill succeeded");
                Ok(output)
            }
            Err(source) => {
                warn!(error = %source, "Skill failed");
                Err(AgentError::SkillExecution {
                    skill: name.to_string(),
                    source,
                })
            }
        }
    }

    /// `dispatch` bounded by `limit`; a timeout counts as a skill failure
    pub async fn dispatch_with_timeout(
        &self,
        name: &str,
        args: &SkillArgs,
        limit: Duration,
    ) -> Result<SkillOutput> {
        match tokio::time::timeout(limit, self.dispatch(name, args)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::SkillExecution {
                skill: name.to_string(),
                source: anyhow::anyhow!("timed out after {}s", limit.as_secs_f32()),
            }),
        }
    }

    /// Number of registered skills
    pub fn len(&self) -> usize {
        self.entries.read().skills.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().skills.is_empty()
    }
}

fn check_signature(skill: &dyn Skill) -> Result<()> {
    if skill.name().trim().is_empty() {
        return Err(AgentError::InvalidArguments {
            skill: String::new(),
            reason: "skill name must not be empty".to_string(),
        });
    }
    skill
        .signature()
        .validate()
        .map_err(|reason| AgentError::InvalidArguments {
            skill: skill.name().to_string(),
            reason: format!("malformed signature: {}", reason),
        })
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillRegistry")
            .field("skills", &self.list_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{FnSkill, SkillSignature};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(value: Value) -> SkillArgs {
        value.as_object().cloned().unwrap()
    }

    fn constant(name: &str, output: &'static str) -> FnSkill {
        FnSkill::new(name, "Returns a constant", SkillSignature::new(), move |_| {
            Ok(SkillOutput::text(output))
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SkillRegistry::new();
        registry.register(constant("a", "1")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("a").is_ok());
        assert!(matches!(
            registry.lookup("missing"),
            Err(AgentError::UnknownSkill(_))
        ));
    }

    #[test]
    fn test_duplicate_register_fails_without_overwrite() {
        let registry = SkillRegistry::new();
        registry.register(constant("a", "1")).unwrap();

        let err = registry.register(constant("a", "2")).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateSkill(name) if name == "a"));

        registry.register_with(constant("a", "2"), true).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reload_requires_existing() {
        let registry = SkillRegistry::new();
        let err = registry.reload(constant("a", "1")).unwrap_err();
        assert!(matches!(err, AgentError::UnknownSkill(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_names_in_registration_order() {
        let registry = SkillRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(constant(name, "x")).unwrap();
        }
        registry.reload(constant("alpha", "y")).unwrap();

        assert_eq!(registry.list_names(), vec!["zeta", "alpha", "mid"]);

        assert!(registry.unregister("alpha"));
        assert!(!registry.unregister("alpha"));
        assert_eq!(registry.list_names(), vec!["zeta", "mid"]);
    }

    #[test]
    fn test_register_rejects_malformed_signature() {
        let registry = SkillRegistry::new();
        let sig = SkillSignature::new()
            .required("x", "string", "")
            .required("x", "string", "");
        let err = registry
            .register(FnSkill::new("bad", "", sig, |_| Ok(SkillOutput::text(""))))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_returns_result() {
        let registry = SkillRegistry::new();
        let sig = SkillSignature::new().required("text", "string", "Text to echo");
        registry
            .register(FnSkill::new("echo", "Echo", sig, |a| {
                Ok(SkillOutput::text(a["text"].as_str().unwrap_or_default()))
            }))
            .unwrap();

        let out = registry.dispatch("echo", &args(json!({"text": "hello"}))).await.unwrap();
        assert_eq!(out.output, "hello");
    }

    #[tokio::test]
    async fn test_dispatch_missing_argument_does_not_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = SkillRegistry::new();
        let sig = SkillSignature::new().required("text", "string", "");
        registry
            .register(FnSkill::new("echo", "Echo", sig, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(SkillOutput::text("called"))
            }))
            .unwrap();

        let err = registry.dispatch("echo", &SkillArgs::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { .. }));

        let err = registry
            .dispatch("echo", &args(json!({"text": "a", "extra": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { .. }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_wraps_skill_failure() {
        let registry = SkillRegistry::new();
        registry
            .register(FnSkill::new("boom", "Always fails", SkillSignature::new(), |_| {
                anyhow::bail!("disk full")
            }))
            .unwrap();

        let err = registry.dispatch("boom", &SkillArgs::new()).await.unwrap_err();
        match err {
            AgentError::SkillExecution { skill, source } => {
                assert_eq!(skill, "boom");
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_skill() {
        let registry = SkillRegistry::new();
        let err = registry.dispatch("nonexistent_skill", &SkillArgs::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownSkill(_)));
    }

    #[tokio::test]
    async fn test_reload_then_dispatch_sees_new_callable() {
        let registry = SkillRegistry::new();
        registry.register(constant("version", "v1")).unwrap();
        assert_eq!(registry.dispatch("version", &SkillArgs::new()).await.unwrap().output, "v1");

        registry.reload(constant("version", "v2")).unwrap();
        assert_eq!(registry.dispatch("version", &SkillArgs::new()).await.unwrap().output, "v2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_during_reload() {
        let registry = Arc::new(SkillRegistry::new());
        registry.register(constant("version", "v1")).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let out = registry.dispatch("version", &SkillArgs::new()).await.unwrap();
                    seen.push(out.output);
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        for i in 0..50 {
            let output = if i % 2 == 0 { "v2" } else { "v1" };
            registry.reload(constant("version", output)).unwrap();
            tokio::task::yield_now().await;
        }
        registry.reload(constant("version", "v2")).unwrap();

        for handle in handles {
            for output in handle.await.unwrap() {
                assert!(output == "v1" || output == "v2");
            }
        }
        assert_eq!(registry.dispatch("version", &SkillArgs::new()).await.unwrap().output, "v2");
    }

    #[tokio::test]
    async fn test_dispatch_with_timeout() {
        struct Sleepy;

        #[async_trait::async_trait]
        impl Skill for Sleepy {
            fn name(&self) -> &str {
                "sleepy"
            }
            fn description(&self) -> &str {
                "Sleeps"
            }
            fn signature(&self) -> SkillSignature {
                SkillSignature::new()
            }
            async fn invoke(&self, _args: &SkillArgs) -> anyhow::Result<SkillOutput> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(SkillOutput::text("late"))
            }
        }

        let registry = SkillRegistry::new();
        registry.register(Sleepy).unwrap();

        let err = registry
            .dispatch_with_timeout("sleepy", &SkillArgs::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.summary().contains("timed out"));
    }
}
