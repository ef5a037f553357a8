// Sandbox Host (spec §4.1): spawns one OS process per cyber, enforces soft
// CPU/mem caps, and tracks each process's lifecycle through to
// termination or crash. Grounded on the teacher's `daemon/lifecycle.rs`
// (PID tracking, SIGTERM-then-SIGKILL) generalized from "manage the one
// daemon process" to "manage N named cyber processes."
//
// Filesystem namespacing (a cyber sees only its own workspace) is enforced
// by `fsutil::safe_join`, used at every read/write call site inside a
// cyber's process rather than here — this host only owns process lifecycle
// and resource accounting.

pub mod process;
pub mod quota;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::config::SandboxSettings;
use crate::errors::SubspaceError;
use crate::events::{EventBus, EventKind};
use crate::metrics::Metrics;
use quota::QuotaSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyberState {
    Spawning,
    Running,
    Crashed,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyberStatus {
    pub state: CyberState,
    pub pid: Option<u32>,
    pub cpu_percent: f32,
    pub mem_mb: u64,
    pub last_heartbeat: DateTime<Utc>,
}

struct CyberProcess {
    pid: u32,
    state: CyberState,
    last_heartbeat: DateTime<Utc>,
    sampler: QuotaSampler,
    exit_code: Option<i32>,
}

pub struct SandboxHost {
    workspace_root: PathBuf,
    template_root: PathBuf,
    settings: SandboxSettings,
    events: Arc<EventBus>,
    metrics: Arc<Metrics>,
    processes: Mutex<HashMap<String, CyberProcess>>,
}

impl SandboxHost {
    pub fn new(
        workspace_root: PathBuf,
        template_root: PathBuf,
        settings: SandboxSettings,
        events: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            workspace_root,
            template_root,
            settings,
            events,
            metrics,
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn cyber_dir(&self, cyber_name: &str) -> PathBuf {
        self.workspace_root.join("cybers").join(cyber_name)
    }

    /// Spawn a cyber process. Refuses with `SpawnRefused` if the concurrency
    /// quota is exhausted or the template tree doesn't exist (spec §4.1).
    #[instrument(skip(self), fields(cyber = %cyber_name))]
    pub async fn spawn(&self, cyber_name: &str) -> Result<CyberStatus> {
        {
            let processes = self.processes.lock().await;
            let running = processes
                .values()
                .filter(|p| p.state == CyberState::Running || p.state == CyberState::Spawning)
                .count();
            if running >= self.settings.max_concurrent_cybers {
                return Err(SubspaceError::SpawnRefused {
                    cyber: cyber_name.to_string(),
                    reason: format!(
                        "concurrency quota exhausted ({running}/{})",
                        self.settings.max_concurrent_cybers
                    ),
                }
                .into());
            }
        }

        if !self.template_root.exists() {
            return Err(SubspaceError::SpawnRefused {
                cyber: cyber_name.to_string(),
                reason: format!("template missing at {}", self.template_root.display()),
            }
            .into());
        }

        let dest = self.cyber_dir(cyber_name);
        if !dest.exists() {
            copy_template(&self.template_root, &dest)
                .with_context(|| format!("failed to materialize workspace for '{cyber_name}'"))?;
        }

        let exe = std::env::current_exe().context("failed to resolve current executable path")?;
        let mut child = Command::new(exe)
            .arg("cyber")
            .arg("--name")
            .arg(cyber_name)
            .arg("--workspace")
            .arg(&dest)
            .spawn()
            .with_context(|| format!("failed to spawn process for cyber '{cyber_name}'"))?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("spawned child for '{cyber_name}' has no pid"))?;

        let now = Utc::now();
        {
            let mut processes = self.processes.lock().await;
            processes.insert(
                cyber_name.to_string(),
                CyberProcess {
                    pid,
                    state: CyberState::Running,
                    last_heartbeat: now,
                    sampler: QuotaSampler::new(pid),
                    exit_code: None,
                },
            );
        }

        self.metrics
            .sandbox_spawns_total
            .with_label_values(&["normal"])
            .inc();
        self.events.publish(EventKind::CyberCreated {
            cyber: cyber_name.to_string(),
        });

        let cyber_name_owned = cyber_name.to_string();
        let events = Arc::clone(&self.events);
        let metrics = Arc::clone(&self.metrics);
        // The teacher's daemon doesn't watch a child process (it *is* the
        // process) — this task is the generalization needed because the
        // Sandbox Host outlives each cyber it spawns.
        tokio::spawn(async move {
            let exit = child.wait().await;
            match exit {
                Ok(status) => {
                    warn!(cyber = %cyber_name_owned, code = ?status.code(), "cyber process exited");
                    metrics
                        .sandbox_terminations_total
                        .with_label_values(&["crashed"])
                        .inc();
                    events.publish(EventKind::CyberCrashed {
                        cyber: cyber_name_owned.clone(),
                        exit_code: status.code(),
                    });
                }
                Err(err) => {
                    warn!(cyber = %cyber_name_owned, error = %err, "failed to wait on cyber process");
                }
            }
        });

        Ok(CyberStatus {
            state: CyberState::Running,
            pid: Some(pid),
            cpu_percent: 0.0,
            mem_mb: 0,
            last_heartbeat: now,
        })
    }

    /// Signal a running cyber to stop, escalating to SIGKILL after
    /// `grace_period` if it hasn't exited (spec §4.1 `terminate`).
    #[instrument(skip(self), fields(cyber = %cyber_name))]
    pub async fn terminate(&self, cyber_name: &str, grace_period: Duration) -> Result<()> {
        let pid = {
            let processes = self.processes.lock().await;
            processes.get(cyber_name).map(|p| p.pid)
        };
        let Some(pid) = pid else {
            return Ok(());
        };

        process::terminate_with_grace(pid, grace_period)
            .await
            .with_context(|| format!("failed to terminate pid {pid}"))?;

        {
            let mut processes = self.processes.lock().await;
            if let Some(process) = processes.get_mut(cyber_name) {
                process.state = CyberState::Terminated;
            }
        }

        self.metrics
            .sandbox_terminations_total
            .with_label_values(&["requested"])
            .inc();
        self.events.publish(EventKind::CyberTerminated {
            cyber: cyber_name.to_string(),
            reason: "operator request".to_string(),
        });
        info!(cyber = %cyber_name, "cyber terminated");
        Ok(())
    }

    /// Current status, sampling CPU/memory fresh each call (spec §4.1
    /// `status`). Detects and surfaces crashes whose exit a watcher task
    /// already observed via `process_exists`.
    pub async fn status(&self, cyber_name: &str) -> Option<CyberStatus> {
        let mut processes = self.processes.lock().await;
        let process = processes.get_mut(cyber_name)?;

        if process.state == CyberState::Running && !process::process_exists(process.pid) {
            process.state = CyberState::Crashed;
        }

        let usage = process.sampler.sample().unwrap_or_default();
        if usage.cpu_percent > self.settings.cpu_percent_cap || usage.mem_mb > self.settings.mem_mb_cap {
            warn!(
                cyber = %cyber_name,
                cpu_percent = usage.cpu_percent,
                mem_mb = usage.mem_mb,
                "cyber exceeds soft resource cap"
            );
        }

        Some(CyberStatus {
            state: process.state,
            pid: Some(process.pid),
            cpu_percent: usage.cpu_percent,
            mem_mb: usage.mem_mb,
            last_heartbeat: process.last_heartbeat,
        })
    }

    pub async fn record_heartbeat(&self, cyber_name: &str) {
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get_mut(cyber_name) {
            process.last_heartbeat = Utc::now();
        }
    }

    pub async fn running_cybers(&self) -> Vec<String> {
        let processes = self.processes.lock().await;
        processes
            .iter()
            .filter(|(_, p)| p.state == CyberState::Running)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Recursively copy a template tree into a fresh cyber workspace. Only used
/// on first spawn — a cyber that already has a workspace keeps it across
/// restarts (spec §4.1 "workspace preserved" on crash).
fn copy_template(template_root: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create workspace dir {}", dest.display()))?;

    for entry in WalkDir::new(template_root).into_iter().filter_map(|e| e.ok()) {
        let relative = entry
            .path()
            .strip_prefix(template_root)
            .expect("walkdir entries are always under the root they were given");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} -> {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_template_reproduces_tree() {
        let template = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(template.path().join("code")).unwrap();
        std::fs::write(template.path().join("code/main.py"), b"print(1)").unwrap();
        std::fs::write(template.path().join("persona.toml"), b"name = \"x\"").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("cyber");
        copy_template(template.path(), &target).unwrap();

        assert_eq!(
            std::fs::read(target.join("code/main.py")).unwrap(),
            b"print(1)"
        );
        assert_eq!(
            std::fs::read(target.join("persona.toml")).unwrap(),
            b"name = \"x\""
        );
    }

    #[tokio::test]
    async fn spawn_refuses_when_template_missing() {
        let workspace = tempfile::tempdir().unwrap();
        let host = SandboxHost::new(
            workspace.path().to_path_buf(),
            workspace.path().join("does-not-exist"),
            SandboxSettings::default(),
            Arc::new(EventBus::new()),
            Metrics::new(),
        );
        let result = host.spawn("alice").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawn_refuses_past_concurrency_quota() {
        let workspace = tempfile::tempdir().unwrap();
        let template = tempfile::tempdir().unwrap();
        let mut settings = SandboxSettings::default();
        settings.max_concurrent_cybers = 0;
        let host = SandboxHost::new(
            workspace.path().to_path_buf(),
            template.path().to_path_buf(),
            settings,
            Arc::new(EventBus::new()),
            Metrics::new(),
        );
        let result = host.spawn("alice").await;
        assert!(matches!(
            result.unwrap_err().downcast_ref::<SubspaceError>(),
            Some(SubspaceError::SpawnRefused { .. })
        ));
    }

    #[tokio::test]
    async fn status_of_unknown_cyber_is_none() {
        let workspace = tempfile::tempdir().unwrap();
        let host = SandboxHost::new(
            workspace.path().to_path_buf(),
            workspace.path().to_path_buf(),
            SandboxSettings::default(),
            Arc::new(EventBus::new()),
            Metrics::new(),
        );
        assert!(host.status("nobody").await.is_none());
    }
}
