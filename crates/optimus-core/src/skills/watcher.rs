//! Hot-reload support for skill manifests
//!
//! Watches the manifest directory and reloads, registers or unregisters
//! command skills as their manifests change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::discovery::{CommandSkill, DiscoveryReport, MANIFEST_EXTENSION};
use super::registry::SkillRegistry;
use super::Skill;

/// A change to a manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillChange {
    /// Manifest was created or modified
    Updated(PathBuf),
    /// Manifest was deleted
    Removed(PathBuf),
}

/// Watcher for a skill manifest directory
pub struct SkillWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<Result<Event, notify::Error>>,
    dir: PathBuf,
    /// Which skill each manifest defines
    sources: HashMap<PathBuf, String>,
}

impl SkillWatcher {
    /// Create a watcher for `dir`.
    ///
    /// `discovered` tells which manifests own which registered skills; only
    /// those skills are replaced or removed when their manifest changes.
    pub fn new(dir: &Path, discovered: &DiscoveryReport) -> Result<Self> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |result| {
                let _ = tx.send(result);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let sources = discovered.registered.iter().cloned().collect();

        Ok(Self {
            watcher,
            receiver: rx,
            dir: dir.to_path_buf(),
            sources,
        })
    }

    /// Start watching the manifest directory
    pub fn start(&mut self) -> Result<()> {
        self.watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        info!(dir = %self.dir.display(), "Watching skill manifests for changes");
        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) -> Result<()> {
        self.watcher.unwatch(&self.dir)?;
        info!(dir = %self.dir.display(), "Stopped watching skill manifests");
        Ok(())
    }

    /// Check for pending change events (non-blocking)
    pub fn poll_events(&self) -> Vec<SkillChange> {
        let mut changes = Vec::new();

        while let Ok(result) = self.receiver.try_recv() {
            match result {
                Ok(event) => {
                    for change in Self::process_event(event) {
                        if !changes.contains(&change) {
                            changes.push(change);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "File watcher error");
                }
            }
        }

        changes
    }

    /// Turn a notify event into manifest changes
    fn process_event(event: Event) -> Vec<SkillChange> {
        let manifests = event
            .paths
            .into_iter()
            .filter(|p| p.extension().map_or(false, |e| e == MANIFEST_EXTENSION));

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => manifests
                .map(|p| {
                    // Renames arrive as Modify events for both ends
                    if p.exists() {
                        SkillChange::Updated(p)
                    } else {
                        SkillChange::Removed(p)
                    }
                })
                .collect(),
            EventKind::Remove(_) => manifests.map(SkillChange::Removed).collect(),
            _ => Vec::new(),
        }
    }

    /// Apply manifest changes to `registry`; returns how many were applied
    pub fn apply_changes(&mut self, registry: &SkillRegistry, changes: &[SkillChange]) -> usize {
        let mut applied = 0;

        for change in changes {
            match change {
                SkillChange::Updated(path) => match CommandSkill::from_manifest(path) {
                    Ok(skill) => {
                        let name = skill.name().to_string();
                        let owned = self.sources.get(path) == Some(&name);

                        // Only a skill this manifest defined may be replaced
                        let result = if owned {
                            registry.reload_arc(Arc::new(skill))
                        } else {
                            registry.register_arc(Arc::new(skill), false)
                        };

                        match result {
                            Ok(()) => {
                                if let Some(previous) = self.sources.insert(path.clone(), name) {
                                    if !owned {
                                        registry.unregister(&previous);
                                    }
                                }
                                applied += 1;
                            }
                            Err(e) => warn!(
                                path = %path.display(),
                                error = %e,
                                "Failed to apply manifest"
                            ),
                        }
                    }
                    Err(e) => {
                        // Keep the previous version running
                        let reason = format!("{:#}", e);
                        warn!(
                            path = %path.display(),
                            error = %reason,
                            "Ignoring invalid manifest"
                        );
                    }
                },
                SkillChange::Removed(path) => {
                    if let Some(name) = self.sources.remove(path) {
                        registry.unregister(&name);
                        applied += 1;
                    }
                }
            }
        }

        if applied > 0 {
            debug!(applied, "Applied skill manifest changes");
        }
        applied
    }
}

/// Poll `watcher` every `interval` and apply changes until the task is aborted
pub fn spawn_reload_task(
    mut watcher: SkillWatcher,
    registry: Arc<SkillRegistry>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let changes = watcher.poll_events();
            if !changes.is_empty() {
                watcher.apply_changes(&registry, &changes);
            }
        }
    })
}
