//! Skill discovery from a manifest directory
//!
//! Each `*.toml` file in the directory describes one command skill:
//!
//! ```toml
//! name = "run_tests"
//! description = "Run the project's test suite"
//! command = "cargo test --quiet -- $OPTIMUS_ARG_FILTER"
//! timeout_secs = 300
//!
//! [[parameters]]
//! name = "filter"
//! type = "string"
//! default = ""
//! ```
//!
//! The command runs under `bash -c` with the bound arguments as JSON on stdin
//! and as `OPTIMUS_ARG_<NAME>` environment variables.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use super::registry::SkillRegistry;
use super::{Skill, SkillArgs, SkillOutput, SkillParameter, SkillSignature};

/// Extension of skill manifest files
pub const MANIFEST_EXTENSION: &str = "toml";

/// On-disk description of a command skill
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shell command to run
    pub command: String,
    /// Working directory (default: the manifest's directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub parameters: Vec<SkillParameter>,
}

fn default_timeout() -> u64 {
    120
}

impl SkillManifest {
    /// Parse and check a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: SkillManifest = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        if manifest.name.trim().is_empty() {
            bail!("skill name must not be empty");
        }
        if manifest.command.trim().is_empty() {
            bail!("skill '{}' has an empty command", manifest.name);
        }
        manifest
            .signature()
            .validate()
            .map_err(|reason| anyhow::anyhow!("malformed signature: {}", reason))?;

        Ok(manifest)
    }

    pub fn signature(&self) -> SkillSignature {
        SkillSignature {
            parameters: self.parameters.clone(),
        }
    }
}

/// A skill that runs a shell command
#[derive(Debug, Clone)]
pub struct CommandSkill {
    manifest: SkillManifest,
    working_dir: PathBuf,
    source: PathBuf,
}

impl CommandSkill {
    /// Build a command skill from the manifest at `path`
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let manifest = SkillManifest::load(path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let working_dir = match &manifest.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base,
        };

        Ok(Self {
            manifest,
            working_dir,
            source: path.to_path_buf(),
        })
    }

    /// Manifest file this skill was loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }

    fn env_vars(args: &SkillArgs) -> Vec<(String, String)> {
        args.iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (format!("OPTIMUS_ARG_{}", k.to_uppercase()), value)
            })
            .collect()
    }
}

#[async_trait]
impl Skill for CommandSkill {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn signature(&self) -> SkillSignature {
        self.manifest.signature()
    }

    async fn invoke(&self, args: &SkillArgs) -> Result<SkillOutput> {
        debug!(
            skill = %self.manifest.name,
            command = %self.manifest.command,
            "Running command skill"
        );

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&self.manifest.command)
            .current_dir(&self.working_dir)
            .envs(Self::env_vars(args))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start '{}'", self.manifest.command))?;

        let payload = serde_json::to_vec(args)?;
        let stdin = child.stdin.take();
        // Feeding stdin counts against the timeout too: a command that never
        // reads it would otherwise block the write once the pipe is full
        let finished = async move {
            if let Some(mut stdin) = stdin {
                // The command may exit without reading stdin
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "Command closed stdin early");
                }
            }
            child.wait_with_output().await
        };

        let limit = Duration::from_secs(self.manifest.timeout_secs);
        let output = match timeout(limit, finished).await {
            Ok(result) => result.context("Failed to wait for command")?,
            Err(_) => bail!("command timed out after {}s", self.manifest.timeout_secs),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(SkillOutput::text(stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            bail!("command exited with code {}: {}", code, stderr.trim())
        }
    }
}

/// Outcome of scanning a manifest directory
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Manifests that registered a skill, with the skill name
    pub registered: Vec<(PathBuf, String)>,
    /// Manifests that could not be loaded, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

impl DiscoveryReport {
    /// Names of the registered skills, in discovery order
    pub fn names(&self) -> Vec<&str> {
        self.registered.iter().map(|(_, name)| name.as_str()).collect()
    }
}

/// List manifest files in `dir`, sorted by path
pub fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == MANIFEST_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Register every manifest in `dir`.
///
/// A manifest that fails to parse or register is logged and skipped; the
/// rest are still registered. Only an unreadable directory is an error.
pub fn discover(registry: &SkillRegistry, dir: &Path) -> Result<DiscoveryReport> {
    let mut report = DiscoveryReport::default();

    for path in manifest_paths(dir)? {
        let loaded = CommandSkill::from_manifest(&path).and_then(|skill| {
            let name = skill.name().to_string();
            registry
                .register_arc(Arc::new(skill), false)
                .map(|_| name)
                .map_err(anyhow::Error::from)
        });

        match loaded {
            Ok(name) => report.registered.push((path, name)),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(path = %path.display(), error = %reason, "Skipping skill manifest");
                report.failures.push((path, reason));
            }
        }
    }

    info!(
        dir = %dir.display(),
        registered = report.registered.len(),
        failed = report.failures.len(),
        "Skill discovery finished"
    );
    Ok(report)
}
