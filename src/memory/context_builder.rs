// Context Builder — renders a selected set of memory blocks into the text
// handed to the Brain Protocol (spec §4.5). Deterministic given identical
// inputs (spec invariant 6): same blocks, same order, same bytes out.

use std::fmt::Write as _;

use super::block::{BlockDetail, BlockType, MemoryBlock};
use super::content_loader::ContentLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Structured,
    Json,
    Narrative,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// Render `blocks` (already selected and ordered by the selector) into
    /// a single string. Content is loaded lazily, one block at a time, so a
    /// failure to load one block's content doesn't abort the whole render —
    /// it's rendered as an inline load-error note instead (spec §4.5: a
    /// missing file must not fail the whole context).
    pub fn build(
        loader: &mut ContentLoader,
        blocks: &[&MemoryBlock],
        format: ContextFormat,
    ) -> String {
        match format {
            ContextFormat::Structured => Self::build_structured(loader, blocks),
            ContextFormat::Json => Self::build_json(loader, blocks),
            ContextFormat::Narrative => Self::build_narrative(loader, blocks),
        }
    }

    fn build_structured(loader: &mut ContentLoader, blocks: &[&MemoryBlock]) -> String {
        let mut out = String::new();
        for block in blocks {
            let heading = Self::heading_for(block);
            let _ = writeln!(out, "## {heading}");
            let _ = writeln!(out, "{}", Self::load_or_note(loader, block));
            out.push('\n');
        }
        out
    }

    fn build_narrative(loader: &mut ContentLoader, blocks: &[&MemoryBlock]) -> String {
        let mut out = String::new();
        for block in blocks {
            let content = Self::load_or_note(loader, block);
            let _ = writeln!(out, "Regarding {}: {}", block.id, content.trim());
        }
        out
    }

    fn build_json(loader: &mut ContentLoader, blocks: &[&MemoryBlock]) -> String {
        let entries: Vec<serde_json::Value> = blocks
            .iter()
            .map(|block| {
                serde_json::json!({
                    "id": block.id,
                    "type": block.block_type.as_str(),
                    "priority": block.priority,
                    "pinned": block.pinned,
                    "content": Self::load_or_note(loader, block),
                })
            })
            .collect();
        serde_json::to_string_pretty(&serde_json::json!({ "blocks": entries }))
            .unwrap_or_else(|_| "{\"blocks\":[]}".to_string())
    }

    fn heading_for(block: &MemoryBlock) -> String {
        match &block.detail {
            BlockDetail::File { path, .. } => format!("File: {}", path.display()),
            BlockDetail::Message { sender, subject, .. } => {
                format!("Message from {sender}: {subject}")
            }
            BlockDetail::Observation { observation_kind, .. } => {
                format!("Observation: {observation_kind}")
            }
            BlockDetail::Knowledge { topic_path, .. } => format!("Knowledge: {}", topic_path.join("/")),
            BlockDetail::Task { task_id, .. } => format!("Task: {task_id}"),
            BlockDetail::Generic => match block.block_type {
                BlockType::Status => "Status".to_string(),
                BlockType::History => "History".to_string(),
                BlockType::Context => "Context".to_string(),
                BlockType::CycleState => "Cycle state".to_string(),
                _ => block.id.clone(),
            },
        }
    }

    fn load_or_note(loader: &mut ContentLoader, block: &MemoryBlock) -> String {
        match loader.load(block) {
            Ok(content) => content,
            Err(err) => format!("[unavailable: {err}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::block::{MemoryBlock, Priority, Scope};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn deterministic_for_identical_inputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "content a").unwrap();

        let block = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            "a.txt",
            None,
            Priority::Low,
            BlockDetail::File {
                path: PathBuf::from("a.txt"),
                line_range: None,
                content_digest: String::new(),
            },
        );
        let blocks = vec![&block];

        let mut loader1 = ContentLoader::new(
            dir.path().to_path_buf(),
            "alice".to_string(),
            Duration::from_secs(60),
        );
        let mut loader2 = ContentLoader::new(
            dir.path().to_path_buf(),
            "alice".to_string(),
            Duration::from_secs(60),
        );

        let first = ContextBuilder::build(&mut loader1, &blocks, ContextFormat::Structured);
        let second = ContextBuilder::build(&mut loader2, &blocks, ContextFormat::Structured);
        assert_eq!(first, second);
        assert!(first.contains("content a"));
    }

    #[test]
    fn missing_file_does_not_abort_render() {
        let dir = tempfile::tempdir().unwrap();
        let block = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            "missing.txt",
            None,
            Priority::Low,
            BlockDetail::File {
                path: PathBuf::from("missing.txt"),
                line_range: None,
                content_digest: String::new(),
            },
        );
        let blocks = vec![&block];
        let mut loader = ContentLoader::new(
            dir.path().to_path_buf(),
            "alice".to_string(),
            Duration::from_secs(60),
        );
        let rendered = ContextBuilder::build(&mut loader, &blocks, ContextFormat::Structured);
        assert!(rendered.contains("unavailable"));
    }

    #[test]
    fn json_format_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let block = MemoryBlock::new(
            Scope::Personal,
            BlockType::Status,
            "status/current",
            None,
            Priority::Medium,
            BlockDetail::Generic,
        );
        let blocks = vec![&block];
        let mut loader = ContentLoader::new(
            dir.path().to_path_buf(),
            "alice".to_string(),
            Duration::from_secs(60),
        );
        let rendered = ContextBuilder::build(&mut loader, &blocks, ContextFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert!(parsed["blocks"].is_array());
    }
}
