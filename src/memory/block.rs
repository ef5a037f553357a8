// Memory Block — a symbolic reference to content, not the content itself
// (spec §3 "Memory Block").
//
// Modeled as a tagged union discriminated by `kind`, with a common header
// shared across variants (spec §9 design note "Memory block polymorphism").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    File,
    Message,
    Observation,
    Task,
    Knowledge,
    Status,
    History,
    Context,
    CycleState,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::File => "file",
            BlockType::Message => "message",
            BlockType::Observation => "observation",
            BlockType::Task => "task",
            BlockType::Knowledge => "knowledge",
            BlockType::Status => "status",
            BlockType::History => "history",
            BlockType::Context => "context",
            BlockType::CycleState => "cycle-state",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Personal,
    Grid,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Grid => "grid",
        }
    }
}

/// Subtype-specific payload, discriminated alongside `BlockType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum BlockDetail {
    File {
        path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        line_range: Option<(u32, u32)>,
        content_digest: String,
    },
    Message {
        sender: String,
        recipient: String,
        subject: String,
        preview: String,
        path: PathBuf,
        read: bool,
    },
    Observation {
        observation_kind: String,
        path: PathBuf,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Knowledge {
        topic_path: Vec<String>,
        relevance: f64,
    },
    Task {
        task_id: String,
        description: String,
        status: String,
        links: Vec<String>,
    },
    Generic,
}

/// A memory block: a symbolic reference plus the shared header fields every
/// variant carries (spec §3 invariant 1: stable id of the form
/// `<scope>:<type>:<semantic-path>[:<content-hash>]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: String,
    pub block_type: BlockType,
    pub priority: Priority,
    pub confidence: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<chrono::DateTime<chrono::Utc>>,
    pub pinned: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub last_accessed: Option<chrono::DateTime<chrono::Utc>>,
    pub detail: BlockDetail,
}

impl MemoryBlock {
    pub fn new(
        scope: Scope,
        block_type: BlockType,
        semantic_path: &str,
        content_hash: Option<&str>,
        priority: Priority,
        detail: BlockDetail,
    ) -> Self {
        Self {
            id: make_id(scope, block_type, semantic_path, content_hash),
            block_type,
            priority,
            confidence: 1.0,
            created_at: chrono::Utc::now(),
            expiry: None,
            pinned: false,
            metadata: HashMap::new(),
            access_count: 0,
            last_accessed: None,
            detail,
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expiry.map(|e| now >= e).unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Some(chrono::Utc::now());
    }

    /// Seconds since creation, used by the recency-decay relevance term.
    pub fn age_secs(&self, now: chrono::DateTime<chrono::Utc>) -> f64 {
        (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Build a stable block id of the form
/// `<scope>:<type>:<semantic-path>[:<content-hash>]`, forbidding
/// double-prefixing (spec invariant 1 / §9 design note).
pub fn make_id(
    scope: Scope,
    block_type: BlockType,
    semantic_path: &str,
    content_hash: Option<&str>,
) -> String {
    let cleaned = strip_known_prefix(scope, block_type, semantic_path);
    match content_hash {
        Some(hash) => format!(
            "{}:{}:{}:{}",
            scope.as_str(),
            block_type.as_str(),
            cleaned,
            hash
        ),
        None => format!("{}:{}:{}", scope.as_str(), block_type.as_str(), cleaned),
    }
}

/// If `semantic_path` already carries the `scope:type:` prefix (e.g. it was
/// accidentally passed a full id instead of a bare path), strip it so
/// `make_id` never double-prefixes.
fn strip_known_prefix(scope: Scope, block_type: BlockType, semantic_path: &str) -> String {
    let prefix = format!("{}:{}:", scope.as_str(), block_type.as_str());
    semantic_path
        .strip_prefix(&prefix)
        .unwrap_or(semantic_path)
        .to_string()
}

/// Parse an id back into its components. Used by tests and diagnostics; the
/// working-memory store itself treats ids as opaque keys.
pub fn parse_id(id: &str) -> Option<(Scope, BlockType, String, Option<String>)> {
    let mut parts = id.splitn(4, ':');
    let scope = match parts.next()? {
        "personal" => Scope::Personal,
        "grid" => Scope::Grid,
        _ => return None,
    };
    let block_type = match parts.next()? {
        "file" => BlockType::File,
        "message" => BlockType::Message,
        "observation" => BlockType::Observation,
        "task" => BlockType::Task,
        "knowledge" => BlockType::Knowledge,
        "status" => BlockType::Status,
        "history" => BlockType::History,
        "context" => BlockType::Context,
        "cycle-state" => BlockType::CycleState,
        _ => return None,
    };
    let rest = parts.next()?.to_string();
    let hash = parts.next().map(|s| s.to_string());
    Some((scope, block_type, rest, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_never_double_prefixes() {
        let id = make_id(Scope::Personal, BlockType::File, "memory/notes.md", None);
        assert_eq!(id, "personal:file:memory/notes.md");

        // Passing an already-prefixed path must not double-prefix.
        let id2 = make_id(Scope::Personal, BlockType::File, &id, None);
        assert_eq!(id2, id);
    }

    #[test]
    fn make_id_includes_hash_when_given() {
        let id = make_id(
            Scope::Grid,
            BlockType::Knowledge,
            "library/rust/ownership",
            Some("abc123"),
        );
        assert_eq!(id, "grid:knowledge:library/rust/ownership:abc123");
    }

    #[test]
    fn parse_id_roundtrips() {
        let id = make_id(Scope::Personal, BlockType::Task, "tasks/t1", Some("deadbeef"));
        let (scope, block_type, path, hash) = parse_id(&id).unwrap();
        assert_eq!(scope, Scope::Personal);
        assert_eq!(block_type, BlockType::Task);
        assert_eq!(path, "tasks/t1");
        assert_eq!(hash, Some("deadbeef".to_string()));
    }

    #[test]
    fn expiry_checked_against_given_instant() {
        let mut block = MemoryBlock::new(
            Scope::Personal,
            BlockType::Observation,
            "inbox/new",
            None,
            Priority::Low,
            BlockDetail::Generic,
        );
        let now = chrono::Utc::now();
        assert!(!block.is_expired(now));
        block.expiry = Some(now - chrono::Duration::seconds(1));
        assert!(block.is_expired(now));
    }
}
