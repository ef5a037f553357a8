// Template Syncer (spec §4.4): reconciles a live cyber workspace against
// its template tree path by path, classifying each with the ownership
// table. Grounded on `sandbox::copy_template`'s walk for the unconditional
// copy case, and `config::ownership::OwnershipTable` for classification.

pub mod history;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{Ownership, OwnershipTable};
use crate::fsutil;
use history::{SyncAction, SyncHistory, SyncRecord};

#[derive(Debug, Default)]
pub struct SyncReport {
    pub overwritten: usize,
    pub skipped: usize,
    pub conflicts: Vec<String>,
    pub created: usize,
}

pub struct TemplateSyncer {
    ownership: OwnershipTable,
}

impl TemplateSyncer {
    pub fn new(ownership: OwnershipTable) -> Self {
        Self { ownership }
    }

    /// Reconcile `live_root` against `template_root`. `history_path` is
    /// where this workspace's append-only sync log lives (spec default:
    /// `.internal/sync_history.jsonl` under the workspace).
    pub fn sync(&self, template_root: &Path, live_root: &Path, history_path: &Path) -> Result<SyncReport> {
        let mut history = SyncHistory::load(history_path)?;
        let mut report = SyncReport::default();

        if !template_root.exists() {
            return Ok(report);
        }

        for entry in WalkDir::new(template_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(template_root)
                .expect("walkdir entries are always under the root they were given")
                .to_path_buf();
            let relative_str = relative.to_string_lossy().replace('\\', "/");
            let live_path = live_root.join(&relative);

            let ownership = self.ownership.classify(&relative);
            match ownership {
                Ownership::CyberOwned => {
                    report.skipped += 1;
                }
                Ownership::TemplateOwned => {
                    self.overwrite(entry.path(), &live_path)?;
                    let digest = fsutil::digest_file(entry.path()).ok();
                    history.append(SyncRecord {
                        timestamp: chrono::Utc::now(),
                        relative_path: relative_str,
                        ownership,
                        action: SyncAction::Overwritten,
                        template_digest: digest,
                        live_digest_before: None,
                    })?;
                    report.overwritten += 1;
                }
                Ownership::MergeRequired => {
                    let action = self.reconcile_merge_required(
                        entry.path(),
                        &live_path,
                        &relative_str,
                        &mut history,
                    )?;
                    match action {
                        SyncAction::ConflictWritten => report.conflicts.push(relative_str),
                        SyncAction::Overwritten => report.overwritten += 1,
                        SyncAction::Created => report.created += 1,
                        SyncAction::Skipped => report.skipped += 1,
                    }
                }
            }
        }

        Ok(report)
    }

    fn overwrite(&self, template_file: &Path, live_path: &Path) -> Result<()> {
        let contents = std::fs::read(template_file)
            .with_context(|| format!("failed to read template file {}", template_file.display()))?;
        fsutil::atomic_write(live_path, &contents)
    }

    /// Merge-required reconciliation: if both sides changed since the last
    /// recorded sync, write the template copy alongside with a conflict
    /// suffix and leave the live file untouched. Otherwise, take whichever
    /// side is the only one that changed (or do nothing if neither did).
    fn reconcile_merge_required(
        &self,
        template_file: &Path,
        live_path: &Path,
        relative_str: &str,
        history: &mut SyncHistory,
    ) -> Result<SyncAction> {
        let template_digest = fsutil::digest_file(template_file)?;
        let live_digest = if live_path.exists() {
            Some(fsutil::digest_file(live_path)?)
        } else {
            None
        };

        let last = history.last_for(relative_str).cloned();

        let action = match (&last, &live_digest) {
            (None, None) => {
                // First sync and the live workspace doesn't have this file
                // yet — just materialize the template's copy.
                self.overwrite(template_file, live_path)?;
                SyncAction::Created
            }
            (None, Some(_)) => {
                // Live already has content with no sync history: treat as
                // cyber-authored, leave it alone.
                SyncAction::Skipped
            }
            (Some(last), live_digest) => {
                let template_changed = last.template_digest.as_deref() != Some(template_digest.as_str());
                let live_changed = last.live_digest_before.as_deref() != live_digest.as_deref();

                if template_changed && live_changed {
                    let conflict_path = conflict_path_for(live_path);
                    self.overwrite(template_file, &conflict_path)?;
                    warn!(path = relative_str, "sync conflict: both template and live changed");
                    SyncAction::ConflictWritten
                } else if template_changed {
                    self.overwrite(template_file, live_path)?;
                    SyncAction::Overwritten
                } else {
                    SyncAction::Skipped
                }
            }
        };

        history.append(SyncRecord {
            timestamp: chrono::Utc::now(),
            relative_path: relative_str.to_string(),
            ownership: Ownership::MergeRequired,
            action,
            template_digest: Some(template_digest),
            live_digest_before: live_digest,
        })?;

        Ok(action)
    }
}

fn conflict_path_for(live_path: &Path) -> PathBuf {
    let file_name = live_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    live_path.with_file_name(format!("{file_name}.conflict"))
}
