// Filesystem discipline shared by every component that writes into the
// shared workspace tree: temp-file-then-rename writes, content digests, and
// path-safety checks (spec §5 "Shared resources").

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::errors::SubspaceError;

/// Write `contents` to `path` atomically: write to a sibling temp file, then
/// rename over the target. Readers of `path` never observe a partial write
/// (spec invariant 6/S6).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?
        .to_string_lossy();
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

    std::fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write temp file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Atomically move `src` to `dst` within the same filesystem (rename is
/// atomic on POSIX within one filesystem — spec §5). Used by the Message
/// Router for outbox -> inbox delivery and by the Task claim mechanism.
pub fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::rename(src, dst).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            src.display(),
            dst.display()
        )
    })?;
    Ok(())
}

/// SHA-256 content digest, hex-encoded. Used by Memory Blocks (content
/// digest field) and the Perception Scanner (change detection).
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {} for digest", path.display()))?;
    Ok(content_digest(&bytes))
}

/// Resolve `relative` against `root` and verify the result does not escape
/// `root`. Cybers may only ever read/write inside their own workspace; any
/// attempt to reach outside it is a [`SubspaceError::SandboxViolation`].
///
/// Does not require the path to exist: lexical normalization is used so a
/// not-yet-created file can still be validated before its first write.
pub fn safe_join(root: &Path, relative: &Path, cyber: &str) -> Result<PathBuf> {
    if relative.is_absolute() {
        return Err(SubspaceError::SandboxViolation {
            cyber: cyber.to_string(),
            path: relative.to_path_buf(),
            reason: "absolute paths are not permitted".to_string(),
        }
        .into());
    }

    let joined = root.join(relative);
    let normalized = normalize_lexically(&joined);
    let root_normalized = normalize_lexically(root);

    if !normalized.starts_with(&root_normalized) {
        return Err(SubspaceError::SandboxViolation {
            cyber: cyber.to_string(),
            path: relative.to_path_buf(),
            reason: "resolved path escapes the workspace root".to_string(),
        }
        .into());
    }

    Ok(normalized)
}

/// Lexical `..`/`.` resolution without touching the filesystem (so it works
/// for paths that don't exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn atomic_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        atomic_write(&path, b"data").unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name(), "x.txt");
    }

    #[test]
    fn safe_join_rejects_parent_escape() {
        let root = PathBuf::from("/workspace/cybers/alice");
        let result = safe_join(&root, &PathBuf::from("../bob/secret"), "alice");
        assert!(result.is_err());
    }

    #[test]
    fn safe_join_rejects_absolute_path() {
        let root = PathBuf::from("/workspace/cybers/alice");
        let result = safe_join(&root, &PathBuf::from("/etc/passwd"), "alice");
        assert!(result.is_err());
    }

    #[test]
    fn safe_join_accepts_nested_relative_path() {
        let root = PathBuf::from("/workspace/cybers/alice");
        let result = safe_join(&root, &PathBuf::from("memory/blocks/a.json"), "alice").unwrap();
        assert_eq!(
            result,
            PathBuf::from("/workspace/cybers/alice/memory/blocks/a.json")
        );
    }

    #[test]
    fn safe_join_rejects_escape_disguised_with_subdir() {
        let root = PathBuf::from("/workspace/cybers/alice");
        let result = safe_join(
            &root,
            &PathBuf::from("memory/../../bob/secret"),
            "alice",
        );
        assert!(result.is_err());
    }

    #[test]
    fn content_digest_is_stable() {
        assert_eq!(content_digest(b"hello"), content_digest(b"hello"));
        assert_ne!(content_digest(b"hello"), content_digest(b"world"));
    }
}
