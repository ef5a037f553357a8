// Working Memory — ordered collection of memory blocks indexed by id and by
// type (spec §4.5). Snapshots round-trip every field (spec invariant 4 /
// scenario S3).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::block::{BlockType, MemoryBlock, Priority};
use crate::fsutil;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    blocks: Vec<MemoryBlock>,
}

/// In-memory working set of memory blocks for one cyber.
///
/// Invariant: at most one block per `(type, id)` — since `id` already
/// encodes the type in its prefix, this reduces to "at most one block per
/// id" (spec invariant 4).
pub struct WorkingMemory {
    blocks: HashMap<String, MemoryBlock>,
    snapshot_path: PathBuf,
}

impl WorkingMemory {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self {
            blocks: HashMap::new(),
            snapshot_path,
        }
    }

    /// Insert or replace a block. Replacing an existing id preserves its
    /// `pinned` flag (spec invariant 5) — callers that want to actually
    /// unpin a block must do so explicitly via [`Self::set_pinned`].
    pub fn add(&mut self, mut block: MemoryBlock) {
        if let Some(existing) = self.blocks.get(&block.id) {
            block.pinned = block.pinned || existing.pinned;
        }
        self.blocks.insert(block.id.clone(), block);
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryBlock> {
        self.blocks.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&MemoryBlock> {
        self.blocks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MemoryBlock> {
        self.blocks.get_mut(id)
    }

    pub fn set_pinned(&mut self, id: &str, pinned: bool) -> bool {
        if let Some(block) = self.blocks.get_mut(id) {
            block.pinned = pinned;
            true
        } else {
            false
        }
    }

    pub fn by_type(&self, block_type: BlockType) -> Vec<&MemoryBlock> {
        self.blocks
            .values()
            .filter(|b| b.block_type == block_type)
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Remove every block whose `expiry` has passed `now`. Critical and
    /// pinned blocks are still subject to expiry — expiry and eviction are
    /// different mechanisms (spec invariant 2 only protects against
    /// *selector* eviction, not explicit expiry cleanup).
    pub fn cleanup_expired(&mut self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|_, b| !b.is_expired(now));
        before - self.blocks.len()
    }

    /// Remove observation blocks older than `max_age`, used by the
    /// Reflection stage (spec §4.7).
    pub fn cleanup_observations_older_than(
        &mut self,
        max_age: chrono::Duration,
        now: chrono::DateTime<chrono::Utc>,
    ) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|_, b| {
            if b.block_type != BlockType::Observation {
                return true;
            }
            now - b.created_at < max_age
        });
        before - self.blocks.len()
    }

    pub fn critical_blocks(&self) -> Vec<&MemoryBlock> {
        self.blocks
            .values()
            .filter(|b| b.priority == Priority::Critical)
            .collect()
    }

    pub fn pinned_blocks(&self) -> Vec<&MemoryBlock> {
        self.blocks.values().filter(|b| b.pinned).collect()
    }

    pub fn save_snapshot(&self) -> Result<()> {
        self.save_snapshot_to(&self.snapshot_path)
    }

    pub fn save_snapshot_to(&self, path: &Path) -> Result<()> {
        let mut blocks: Vec<MemoryBlock> = self.blocks.values().cloned().collect();
        blocks.sort_by(|a, b| a.id.cmp(&b.id));
        let snapshot = Snapshot { blocks };
        let json = serde_json::to_vec_pretty(&snapshot).context("failed to serialize snapshot")?;
        fsutil::atomic_write(path, &json)
    }

    pub fn load_snapshot(&mut self) -> Result<()> {
        self.load_snapshot_from(&self.snapshot_path.clone())
    }

    pub fn load_snapshot_from(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot: Snapshot =
            serde_json::from_str(&contents).context("failed to parse snapshot")?;
        self.blocks.clear();
        for block in snapshot.blocks {
            self.blocks.insert(block.id.clone(), block);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::block::{BlockDetail, Scope};

    fn sample_block(id_path: &str, priority: Priority, pinned: bool) -> MemoryBlock {
        let mut block = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            id_path,
            None,
            priority,
            BlockDetail::File {
                path: PathBuf::from(id_path),
                line_range: None,
                content_digest: "deadbeef".to_string(),
            },
        );
        block.pinned = pinned;
        block
    }

    #[test]
    fn add_replace_preserves_pinned_flag() {
        let mut wm = WorkingMemory::new(PathBuf::from("/tmp/unused.json"));
        let block = sample_block("a.txt", Priority::Low, true);
        let id = block.id.clone();
        wm.add(block);

        let mut replacement = sample_block("a.txt", Priority::High, false);
        replacement.id = id.clone();
        wm.add(replacement);

        assert!(wm.get(&id).unwrap().pinned, "replace must preserve pinned flag");
        assert_eq!(wm.get(&id).unwrap().priority, Priority::High);
    }

    #[test]
    fn at_most_one_block_per_id() {
        let mut wm = WorkingMemory::new(PathBuf::from("/tmp/unused.json"));
        let block = sample_block("a.txt", Priority::Low, false);
        wm.add(block.clone());
        wm.add(block);
        assert_eq!(wm.len(), 1);
    }

    #[test]
    fn snapshot_roundtrips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut wm = WorkingMemory::new(path.clone());
        for i in 0..5 {
            wm.add(sample_block(&format!("file{i}.txt"), Priority::Medium, false));
        }
        wm.add(sample_block("pinned.txt", Priority::Low, true));
        wm.save_snapshot().unwrap();

        let mut restored = WorkingMemory::new(path);
        restored.load_snapshot().unwrap();

        assert_eq!(restored.len(), wm.len());
        for block in wm.all() {
            let restored_block = restored.get(&block.id).expect("block present after restore");
            assert_eq!(restored_block, block);
        }
        assert!(restored
            .all()
            .find(|b| b.id.contains("pinned"))
            .unwrap()
            .pinned);
    }

    #[test]
    fn cleanup_expired_removes_only_expired() {
        let mut wm = WorkingMemory::new(PathBuf::from("/tmp/unused.json"));
        let now = chrono::Utc::now();
        let mut expired = sample_block("expired.txt", Priority::Low, false);
        expired.expiry = Some(now - chrono::Duration::seconds(10));
        let mut fresh = sample_block("fresh.txt", Priority::Low, false);
        fresh.expiry = Some(now + chrono::Duration::seconds(10));
        wm.add(expired);
        wm.add(fresh);

        let removed = wm.cleanup_expired(now);
        assert_eq!(removed, 1);
        assert_eq!(wm.len(), 1);
        assert!(wm.all().next().unwrap().id.contains("fresh"));
    }
}
