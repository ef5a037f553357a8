// Content Loader — given a block, return its content as a string.
// Caches with TTL, invalidates on content-digest change, enforces path
// safety (spec §4.5).

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::block::{BlockDetail, MemoryBlock};
use crate::fsutil;

struct CacheEntry {
    content: String,
    digest: String,
    cached_at: Instant,
}

pub struct ContentLoader {
    workspace_root: PathBuf,
    cyber_name: String,
    ttl: Duration,
    cache: HashMap<String, CacheEntry>,
}

impl ContentLoader {
    pub fn new(workspace_root: PathBuf, cyber_name: String, ttl: Duration) -> Self {
        Self {
            workspace_root,
            cyber_name,
            ttl,
            cache: HashMap::new(),
        }
    }

    /// Load the content referenced by `block`. Only `File` blocks (and
    /// `Message` blocks, which reference a full-text path) have loadable
    /// content; other block types return their `detail` rendered as a
    /// one-line summary.
    pub fn load(&mut self, block: &MemoryBlock) -> Result<String> {
        let path = match &block.detail {
            BlockDetail::File { path, .. } => path.clone(),
            BlockDetail::Message { path, .. } => path.clone(),
            BlockDetail::Observation { path, .. } => path.clone(),
            _ => return Ok(summarize_detail(&block.detail)),
        };

        let safe_path = fsutil::safe_join(&self.workspace_root, &path, &self.cyber_name)?;
        self.load_path(&block.id, &safe_path)
    }

    fn load_path(&mut self, cache_key: &str, path: &Path) -> Result<String> {
        let current_digest = fsutil::digest_file(path)
            .with_context(|| format!("failed to digest {}", path.display()))?;

        if let Some(entry) = self.cache.get(cache_key) {
            let fresh = entry.cached_at.elapsed() < self.ttl;
            let unchanged = entry.digest == current_digest;
            if fresh && unchanged {
                return Ok(entry.content.clone());
            }
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.cache.insert(
            cache_key.to_string(),
            CacheEntry {
                content: content.clone(),
                digest: current_digest,
                cached_at: Instant::now(),
            },
        );

        Ok(content)
    }

    pub fn invalidate(&mut self, cache_key: &str) {
        self.cache.remove(cache_key);
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn cyber_name(&self) -> &str {
        &self.cyber_name
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn summarize_detail(detail: &BlockDetail) -> String {
    match detail {
        BlockDetail::Knowledge { topic_path, relevance } => {
            format!("knowledge: {} (relevance {:.2})", topic_path.join("/"), relevance)
        }
        BlockDetail::Task {
            task_id,
            description,
            status,
            ..
        } => format!("task {task_id} [{status}]: {description}"),
        BlockDetail::Generic => String::new(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::block::{BlockType, MemoryBlock, Priority, Scope};

    fn file_block(relative: &str) -> MemoryBlock {
        MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            relative,
            None,
            Priority::Low,
            BlockDetail::File {
                path: PathBuf::from(relative),
                line_range: None,
                content_digest: String::new(),
            },
        )
    }

    #[test]
    fn loads_and_caches_file_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let mut loader =
            ContentLoader::new(dir.path().to_path_buf(), "alice".to_string(), Duration::from_secs(60));
        let block = file_block("a.txt");

        let content = loader.load(&block).unwrap();
        assert_eq!(content, "hello");
        assert_eq!(loader.cache_len(), 1);
    }

    #[test]
    fn cache_invalidates_when_digest_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "v1").unwrap();

        let mut loader =
            ContentLoader::new(dir.path().to_path_buf(), "alice".to_string(), Duration::from_secs(60));
        let block = file_block("a.txt");

        assert_eq!(loader.load(&block).unwrap(), "v1");

        std::fs::write(&path, "v2").unwrap();
        assert_eq!(loader.load(&block).unwrap(), "v2");
    }

    #[test]
    fn rejects_path_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader =
            ContentLoader::new(dir.path().to_path_buf(), "alice".to_string(), Duration::from_secs(60));
        let block = file_block("../outside.txt");
        assert!(loader.load(&block).is_err());
    }
}
