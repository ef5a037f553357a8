// Default tunables. Mirrors the teacher's `config/constants.rs` — a flat
// module of `pub const` values rather than magic numbers scattered through
// the code.

/// Default per-cyber working-memory token budget.
pub const DEFAULT_TOKEN_BUDGET: u32 = 8_000;

/// Per-stage share of the cycle token budget (spec §4.7), in the order
/// Observation, Decision, Execution, Reflection. Must sum to 1.0.
pub const DEFAULT_STAGE_SHARES: [(&str, f64); 4] = [
    ("observation", 0.25),
    ("decision", 0.25),
    ("execution", 0.10),
    ("reflection", 0.40),
];

/// Floor applied to any stage's adaptive share so no stage is starved to 0.
pub const STAGE_SHARE_FLOOR: f64 = 0.05;

/// Default bounded in-flight window for the Body-File Bridge (spec §4.2).
pub const DEFAULT_BRIDGE_IN_FLIGHT: usize = 1;

/// Default Message Router retry attempts before giving up (spec §4.3).
pub const DEFAULT_ROUTER_MAX_RETRIES: u32 = 5;

/// Base backoff delay for the Message Router's exponential backoff.
pub const DEFAULT_ROUTER_BACKOFF_BASE_MS: u64 = 50;

/// Default content-cache TTL for the Content Loader (spec §4.5).
pub const DEFAULT_CONTENT_CACHE_TTL_SECS: u64 = 30;

/// Default brain request timeout.
pub const DEFAULT_BRAIN_TIMEOUT_MS: u64 = 60_000;

/// Default LRU capacity for the Brain Protocol Server's compiled-signature
/// cache (spec §4.9).
pub const DEFAULT_SIGNATURE_CACHE_CAPACITY: usize = 256;

/// Default graceful-termination grace period for the Sandbox Host.
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 5_000;

/// Default soft CPU percentage cap enforced per cyber.
pub const DEFAULT_CPU_PERCENT_CAP: f32 = 100.0;

/// Default soft memory cap (MB) enforced per cyber.
pub const DEFAULT_MEM_MB_CAP: u64 = 512;

/// Default cap on concurrently running cybers (spec §4.1 "quota exceeded").
pub const DEFAULT_MAX_CONCURRENT_CYBERS: usize = 64;

/// How often the Sandbox Host samples a cyber process's CPU/mem usage.
pub const DEFAULT_QUOTA_POLL_INTERVAL_MS: u64 = 2_000;

/// Relative path (under a cyber's workspace) of the pipeline buffer root.
pub const PIPELINE_DIR: &str = ".internal/memory/pipeline";

/// Relative path of the working-memory snapshot file.
pub const MEMORY_SNAPSHOT_PATH: &str = "memory/snapshot.json";

/// Relative path of the perception scanner's persisted digest map.
pub const SCAN_STATE_PATH: &str = ".internal/memory/status/scan_state.json";

/// Relative path of the template syncer's content-addressed history log.
pub const SYNC_HISTORY_PATH: &str = ".internal/sync_history.jsonl";

/// Default Python script execution wall-clock deadline.
pub const DEFAULT_SCRIPT_WALL_TIMEOUT_MS: u64 = 5_000;

/// Default Python script execution CPU-time deadline.
pub const DEFAULT_SCRIPT_CPU_TIMEOUT_MS: u64 = 2_000;

/// Default captured stdout/stderr cap (bytes) for Python script execution.
pub const DEFAULT_SCRIPT_OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// Default peak memory cap (MB) for Python script execution.
pub const DEFAULT_SCRIPT_MEM_MB_CAP: u64 = 128;
