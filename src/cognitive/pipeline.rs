// Pipeline buffers (spec §4.7 "Pipeline discipline"): each stage has a
// `current`/`previous` pair under
// `/personal/.internal/memory/pipeline/<stage>/`. A stage reads its
// upstream's `current`, writes its own `current`; at cycle boundary every
// stage's `current` rotates to `previous`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    Observation,
    Decision,
    Execution,
    Reflection,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Observation => "observation",
            StageName::Decision => "decision",
            StageName::Execution => "execution",
            StageName::Reflection => "reflection",
        }
    }

    pub fn all() -> [StageName; 4] {
        [
            StageName::Observation,
            StageName::Decision,
            StageName::Execution,
            StageName::Reflection,
        ]
    }
}

pub struct PipelineBuffer {
    stage_dir: PathBuf,
}

impl PipelineBuffer {
    pub fn new(workspace_root: &Path, stage: StageName) -> Self {
        let stage_dir = workspace_root
            .join(".internal")
            .join("memory")
            .join("pipeline")
            .join(stage.as_str());
        Self { stage_dir }
    }

    fn current_path(&self) -> PathBuf {
        self.stage_dir.join("current.json")
    }

    fn previous_path(&self) -> PathBuf {
        self.stage_dir.join("previous.json")
    }

    pub fn write_current<T: Serialize>(&self, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.stage_dir)
            .with_context(|| format!("failed to create pipeline dir {}", self.stage_dir.display()))?;
        let json = serde_json::to_vec_pretty(value).context("failed to serialize pipeline buffer")?;
        fsutil::atomic_write(&self.current_path(), &json)
    }

    pub fn read_current<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Self::read_if_exists(&self.current_path())
    }

    pub fn read_previous<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Self::read_if_exists(&self.previous_path())
    }

    fn read_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline buffer {}", path.display()))?;
        Ok(Some(
            serde_json::from_str(&contents).context("failed to parse pipeline buffer")?,
        ))
    }

    /// Rotate `current` into `previous` at a cycle boundary. Readable even
    /// after a crash — this is a rename, not a read-modify-write.
    pub fn rotate(&self) -> Result<()> {
        let current = self.current_path();
        if !current.exists() {
            return Ok(());
        }
        fsutil::atomic_rename(&current, &self.previous_path())
    }
}

/// Rotate every stage's buffer — called once per cycle boundary (spec §4.7).
pub fn rotate_all(workspace_root: &Path) -> Result<()> {
    for stage in StageName::all() {
        PipelineBuffer::new(workspace_root, stage).rotate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_current_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PipelineBuffer::new(dir.path(), StageName::Observation);
        buffer.write_current(&serde_json::json!({"salient": ["a", "b"]})).unwrap();

        let read: serde_json::Value = buffer.read_current().unwrap().unwrap();
        assert_eq!(read["salient"][0], "a");
    }

    #[test]
    fn rotate_moves_current_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PipelineBuffer::new(dir.path(), StageName::Decision);
        buffer.write_current(&serde_json::json!({"actions": []})).unwrap();
        buffer.rotate().unwrap();

        assert!(buffer.read_current::<serde_json::Value>().unwrap().is_none());
        assert!(buffer.read_previous::<serde_json::Value>().unwrap().is_some());
    }

    #[test]
    fn rotate_with_no_current_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PipelineBuffer::new(dir.path(), StageName::Reflection);
        assert!(buffer.rotate().is_ok());
    }
}
