// Perception Scanner (spec §4.4): diffs the cyber's workspace against a
// persisted digest map and emits observation blocks for new, modified,
// removed, and unreadable files. Restart-safe — state lives in
// `ScanState`, not in memory alone.

pub mod state;

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::fsutil;
use crate::memory::{BlockDetail, BlockType, MemoryBlock, Priority, Scope};
use state::{relative_path_key, ScanState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    NewFile,
    Modified,
    Removed,
    AccessError,
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub message: Option<String>,
}

pub struct PerceptionScanner {
    workspace_root: PathBuf,
    scan_dirs: Vec<PathBuf>,
    state_path: PathBuf,
    state: ScanState,
}

impl PerceptionScanner {
    /// `scan_dirs` are directories relative to `workspace_root` that the
    /// scanner walks each cycle (e.g. `inbox/`, `grid/`) — scanning the
    /// whole workspace every cycle would be wasteful and most of it (the
    /// cyber's own pipeline buffers) isn't meaningful perception input.
    pub fn new(workspace_root: PathBuf, scan_dirs: Vec<PathBuf>, state_path: PathBuf) -> Result<Self> {
        let state = ScanState::load(&state_path)?;
        Ok(Self {
            workspace_root,
            scan_dirs,
            state_path,
            state,
        })
    }

    /// Walk every scan directory, diff against the persisted digest map,
    /// and return the set of changes observed this cycle. Updates and
    /// persists the digest map before returning.
    pub fn scan(&mut self) -> Result<Vec<Observation>> {
        let mut observations = Vec::new();
        let mut seen_keys = std::collections::HashSet::new();

        for scan_dir in self.scan_dirs.clone() {
            let absolute_dir = self.workspace_root.join(&scan_dir);
            if !absolute_dir.exists() {
                continue;
            }

            for entry in WalkDir::new(&absolute_dir)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let absolute = entry.path();
                let key = relative_path_key(&self.workspace_root, absolute)
                    .to_string_lossy()
                    .to_string();
                seen_keys.insert(key.clone());

                match fsutil::digest_file(absolute) {
                    Ok(digest) => {
                        match self.state.digest_of(&key) {
                            None => observations.push(Observation {
                                kind: ChangeKind::NewFile,
                                path: PathBuf::from(&key),
                                message: None,
                            }),
                            Some(previous) if previous != &digest => observations.push(Observation {
                                kind: ChangeKind::Modified,
                                path: PathBuf::from(&key),
                                message: None,
                            }),
                            _ => {}
                        }
                        self.state.set(key, digest);
                    }
                    Err(err) => {
                        warn!(path = %absolute.display(), error = %err, "perception scan could not read file");
                        observations.push(Observation {
                            kind: ChangeKind::AccessError,
                            path: PathBuf::from(&key),
                            message: Some(err.to_string()),
                        });
                    }
                }
            }
        }

        let removed: Vec<String> = self
            .state
            .known_paths()
            .filter(|k| {
                self.scan_dirs
                    .iter()
                    .any(|d| Path::new(k).starts_with(d))
                    && !seen_keys.contains(*k)
            })
            .cloned()
            .collect();
        for key in removed {
            self.state.remove(&key);
            observations.push(Observation {
                kind: ChangeKind::Removed,
                path: PathBuf::from(key),
                message: None,
            });
        }

        self.state.save(&self.state_path)?;
        Ok(observations)
    }

    /// Convert raw observations into memory blocks ready for insertion into
    /// Working Memory (spec §4.4 -> §4.5 handoff). Deduplication against
    /// existing blocks (so a repeatedly-modified file doesn't pile up
    /// duplicate observations) is the caller's responsibility, since only
    /// the caller holds the `WorkingMemory` to check against.
    pub fn into_memory_blocks(observations: &[Observation]) -> Vec<MemoryBlock> {
        observations
            .iter()
            .map(|observation| {
                let kind_str = match observation.kind {
                    ChangeKind::NewFile => "new_file",
                    ChangeKind::Modified => "modified",
                    ChangeKind::Removed => "removed",
                    ChangeKind::AccessError => "access_error",
                };
                let priority = match observation.kind {
                    ChangeKind::AccessError => Priority::Medium,
                    _ => Priority::Low,
                };
                let semantic_path = format!("{}/{}", kind_str, observation.path.display());
                let mut block = MemoryBlock::new(
                    Scope::Personal,
                    BlockType::Observation,
                    &semantic_path,
                    None,
                    priority,
                    BlockDetail::Observation {
                        observation_kind: kind_str.to_string(),
                        path: observation.path.clone(),
                        timestamp: chrono::Utc::now(),
                    },
                );
                if let Some(message) = &observation.message {
                    block
                        .metadata
                        .insert("error".to_string(), serde_json::json!(message));
                }
                block
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_scan_reports_all_files_as_new() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        std::fs::write(dir.path().join("inbox/a.msg.json"), "{}").unwrap();

        let mut scanner = PerceptionScanner::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("inbox")],
            dir.path().join("scan_state.json"),
        )
        .unwrap();

        let observations = scanner.scan().unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].kind, ChangeKind::NewFile);
    }

    #[test]
    fn second_scan_with_no_changes_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        std::fs::write(dir.path().join("inbox/a.msg.json"), "{}").unwrap();

        let state_path = dir.path().join("scan_state.json");
        let mut scanner = PerceptionScanner::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("inbox")],
            state_path.clone(),
        )
        .unwrap();
        scanner.scan().unwrap();

        let mut scanner2 = PerceptionScanner::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("inbox")],
            state_path,
        )
        .unwrap();
        let observations = scanner2.scan().unwrap();
        assert!(observations.is_empty());
    }

    #[test]
    fn detects_modification_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        let file_path = dir.path().join("inbox/a.msg.json");
        std::fs::write(&file_path, "{}").unwrap();
        let state_path = dir.path().join("scan_state.json");

        PerceptionScanner::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("inbox")],
            state_path.clone(),
        )
        .unwrap()
        .scan()
        .unwrap();

        std::fs::write(&file_path, "{\"changed\":true}").unwrap();
        let mut scanner = PerceptionScanner::new(
            dir.path().to_path_buf(),
            vec![PathBuf::from("inbox")],
            state_path.clone(),
        )
        .unwrap();
        let observations = scanner.scan().unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].kind, ChangeKind::Modified);

        std::fs::remove_file(&file_path).unwrap();
        let mut scanner2 =
            PerceptionScanner::new(dir.path().to_path_buf(), vec![PathBuf::from("inbox")], state_path)
                .unwrap();
        let observations2 = scanner2.scan().unwrap();
        assert_eq!(observations2.len(), 1);
        assert_eq!(observations2[0].kind, ChangeKind::Removed);
    }

    #[test]
    fn into_memory_blocks_preserves_error_message() {
        let observations = vec![Observation {
            kind: ChangeKind::AccessError,
            path: PathBuf::from("inbox/broken.msg.json"),
            message: Some("permission denied".to_string()),
        }];
        let blocks = PerceptionScanner::into_memory_blocks(&observations);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].priority, Priority::Medium);
        assert!(blocks[0].metadata.contains_key("error"));
    }
}
