// Unified Memory System (spec §4.5): Working Memory + Content Loader +
// Memory Selector + Context Builder, behind one facade each cognitive-loop
// stage calls into.

pub mod block;
pub mod content_loader;
pub mod context_builder;
pub mod selector;
pub mod working_memory;

pub use block::{BlockDetail, BlockType, MemoryBlock, Priority, Scope};
pub use content_loader::ContentLoader;
pub use context_builder::{ContextBuilder, ContextFormat};
pub use selector::{MemorySelector, SelectionStrategy};
pub use working_memory::WorkingMemory;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Ties the four Memory System components together for one cyber.
pub struct MemorySystem {
    pub working_memory: WorkingMemory,
    pub content_loader: ContentLoader,
    pub selector: MemorySelector,
}

impl MemorySystem {
    pub fn new(
        workspace_root: PathBuf,
        cyber_name: String,
        snapshot_path: PathBuf,
        content_cache_ttl: Duration,
    ) -> Self {
        Self {
            working_memory: WorkingMemory::new(snapshot_path),
            content_loader: ContentLoader::new(workspace_root, cyber_name, content_cache_ttl),
            selector: MemorySelector::new(),
        }
    }

    /// Select within `budget` and render the result in one call, the shape
    /// every cognitive-loop stage actually needs (spec §4.5 / §4.6).
    pub fn build_context(
        &mut self,
        budget: u32,
        task_description: Option<&str>,
        strategy: SelectionStrategy,
        format: ContextFormat,
    ) -> Result<String> {
        let all_blocks: Vec<&MemoryBlock> = self.working_memory.all().collect();
        let selected = self
            .selector
            .select(&all_blocks, budget, task_description, strategy);
        let ids: Vec<String> = selected.iter().map(|b| b.id.clone()).collect();

        let rendered = ContextBuilder::build(&mut self.content_loader, &selected, format);

        for id in ids {
            if let Some(block) = self.working_memory.get_mut(&id) {
                block.touch();
            }
        }

        Ok(rendered)
    }

    pub fn save_snapshot(&self) -> Result<()> {
        self.working_memory.save_snapshot()
    }

    pub fn load_snapshot(&mut self) -> Result<()> {
        self.working_memory.load_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::block::{BlockDetail, Priority, Scope};
    use std::path::PathBuf;

    #[test]
    fn build_context_touches_selected_blocks_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "content").unwrap();

        let mut system = MemorySystem::new(
            dir.path().to_path_buf(),
            "alice".to_string(),
            dir.path().join("snapshot.json"),
            Duration::from_secs(60),
        );

        let mut critical = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            "a.txt",
            None,
            Priority::Critical,
            BlockDetail::File {
                path: PathBuf::from("a.txt"),
                line_range: None,
                content_digest: String::new(),
            },
        );
        critical
            .metadata
            .insert("token_estimate".to_string(), serde_json::json!(10));
        let critical_id = critical.id.clone();
        system.working_memory.add(critical);

        let rendered = system
            .build_context(1000, None, SelectionStrategy::Balanced, ContextFormat::Structured)
            .unwrap();
        assert!(rendered.contains("content"));
        assert_eq!(
            system.working_memory.get(&critical_id).unwrap().access_count,
            1
        );
    }
}
