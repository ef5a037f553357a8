// Generic file-based request/response channel underlying all three special
// files (spec §4.2): a cyber writes `<id>.request.json`, the bridge
// consumes it and writes `<id>.response.json`; the cyber polls for the
// response file and removes it once read. Reads block (via polling) until
// either the response appears or `cancel` fires, satisfying spec §4.2's
// "reads before a response is available block with cancellation on
// shutdown."

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::fsutil;

pub struct FileRequestChannel {
    dir: PathBuf,
}

impl FileRequestChannel {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn request_path(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{request_id}.request.json"))
    }

    fn response_path(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{request_id}.response.json"))
    }

    pub fn write_request<T: Serialize>(&self, request_id: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create bridge directory {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(value).context("failed to serialize request")?;
        fsutil::atomic_write(&self.request_path(request_id), &json)
    }

    pub fn take_request<T: DeserializeOwned>(&self, request_id: &str) -> Result<Option<T>> {
        let path = self.request_path(request_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read request {}", path.display()))?;
        let value = serde_json::from_str(&contents).context("failed to parse request")?;
        std::fs::remove_file(&path).ok();
        Ok(Some(value))
    }

    /// List request ids currently pending in this channel's directory, in
    /// creation order, for FIFO processing (spec §4.2 "FIFO order per
    /// file").
    pub fn pending_request_ids(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut named: Vec<(std::time::SystemTime, String)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let id = name.strip_suffix(".request.json")?.to_string();
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, id))
            })
            .collect();
        named.sort_by_key(|(time, _)| *time);
        named.into_iter().map(|(_, id)| id).collect()
    }

    pub fn write_response<T: Serialize>(&self, request_id: &str, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value).context("failed to serialize response")?;
        fsutil::atomic_write(&self.response_path(request_id), &json)
    }

    /// Poll for the response to `request_id`, returning `Ok(None)` if
    /// `cancel` fires first.
    pub async fn await_response<T: DeserializeOwned>(
        &self,
        request_id: &str,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<Option<T>> {
        let path = self.response_path(request_id);
        loop {
            if path.exists() {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read response {}", path.display()))?;
                let value = serde_json::from_str(&contents).context("failed to parse response")?;
                std::fs::remove_file(&path).ok();
                return Ok(Some(value));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Special-file directories live under `.internal/bridge/<name>/` — the
/// spec's workspace-layout tree (§6) doesn't pin an exact path for these,
/// only for pipeline/task/log/status directories, so this is a filled-in
/// convention rather than a bit-exact requirement.
pub fn directory_for(workspace_root: &Path, special_file: &str) -> PathBuf {
    workspace_root.join(".internal").join("bridge").join(special_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_request_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileRequestChannel::new(dir.path().to_path_buf());

        channel.write_request("r1", &serde_json::json!({"hello": "world"})).unwrap();
        let taken: serde_json::Value = channel.take_request("r1").unwrap().unwrap();
        assert_eq!(taken["hello"], "world");
        assert!(channel.take_request::<serde_json::Value>("r1").unwrap().is_none());

        channel.write_response("r1", &serde_json::json!({"ok": true})).unwrap();
        let cancel = CancellationToken::new();
        let response: Option<serde_json::Value> = channel
            .await_response("r1", &cancel, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(response.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn cancellation_unblocks_await_response() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileRequestChannel::new(dir.path().to_path_buf());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response: Option<serde_json::Value> = channel
            .await_response("never-arrives", &cancel, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(response.is_none());
    }

    #[test]
    fn pending_request_ids_are_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let channel = FileRequestChannel::new(dir.path().to_path_buf());
        channel.write_request("first", &serde_json::json!({})).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        channel.write_request("second", &serde_json::json!({})).unwrap();

        let ids = channel.pending_request_ids();
        assert_eq!(ids, vec!["first".to_string(), "second".to_string()]);
    }
}
