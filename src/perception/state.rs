// Persisted scan state — a content-addressed digest map used to diff two
// successive filesystem scans without holding prior observations in
// memory (spec §4.4 "restart-safe incremental scanning").

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::fsutil;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ScanState {
    /// Relative path (as stored on disk) -> last-seen content digest.
    digests: HashMap<String, String>,
}

impl ScanState {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scan state {}", path.display()))?;
        serde_json::from_str(&contents).context("failed to parse scan state")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("failed to serialize scan state")?;
        fsutil::atomic_write(path, &json)
    }

    pub fn digest_of(&self, relative_path: &str) -> Option<&String> {
        self.digests.get(relative_path)
    }

    pub fn set(&mut self, relative_path: String, digest: String) {
        self.digests.insert(relative_path, digest);
    }

    pub fn remove(&mut self, relative_path: &str) -> Option<String> {
        self.digests.remove(relative_path)
    }

    pub fn known_paths(&self) -> impl Iterator<Item = &String> {
        self.digests.keys()
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

pub fn relative_path_key(root: &Path, absolute: &Path) -> PathBuf {
    absolute.strip_prefix(root).unwrap_or(absolute).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_state.json");

        let mut state = ScanState::default();
        state.set("a.txt".to_string(), "digest-a".to_string());
        state.set("b.txt".to_string(), "digest-b".to_string());
        state.save(&path).unwrap();

        let restored = ScanState::load(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.digest_of("a.txt"), Some(&"digest-a".to_string()));
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = ScanState::load(&dir.path().join("absent.json")).unwrap();
        assert!(state.is_empty());
    }
}
