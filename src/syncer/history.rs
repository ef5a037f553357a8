// Append-only, content-addressed sync history (spec §4.4 "each sync
// records a commit in a local content-addressed history so that rollbacks
// are possible"). One JSON line per path touched by a sync, appended — not
// rewritten — so the log itself is the rollback source of truth.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Ownership;
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Overwritten,
    Skipped,
    ConflictWritten,
    Created,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub timestamp: DateTime<Utc>,
    pub relative_path: String,
    pub ownership: Ownership,
    pub action: SyncAction,
    pub template_digest: Option<String>,
    pub live_digest_before: Option<String>,
}

pub struct SyncHistory {
    path: std::path::PathBuf,
    records: Vec<SyncRecord>,
}

impl SyncHistory {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                records: Vec::new(),
            });
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync history {}", path.display()))?;
        let records = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<SyncRecord>, _>>()
            .with_context(|| format!("failed to parse sync history {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Most recent record for a given path, used to detect "changed since
    /// last sync" for merge-required paths.
    pub fn last_for(&self, relative_path: &str) -> Option<&SyncRecord> {
        self.records.iter().rev().find(|r| r.relative_path == relative_path)
    }

    pub fn append(&mut self, record: SyncRecord) -> Result<()> {
        let mut contents = if self.path.exists() {
            std::fs::read_to_string(&self.path).unwrap_or_default()
        } else {
            String::new()
        };
        contents.push_str(&serde_json::to_string(&record)?);
        contents.push('\n');
        fsutil::atomic_write(&self.path, contents.as_bytes())?;
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[SyncRecord] {
        &self.records
    }
}
