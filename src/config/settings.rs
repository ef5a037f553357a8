// Settings types shared by the coordinator and cyber processes.
//
// Mirrors the shape of the teacher's `config/settings.rs`: plain serde
// structs with `Default` impls providing sane values, loaded by
// `config::loader::load_settings`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::constants::*;
use super::ownership::OwnershipTable;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    pub cpu_percent_cap: f32,
    pub mem_mb_cap: u64,
    pub terminate_grace_ms: u64,
    pub max_concurrent_cybers: usize,
    pub quota_poll_interval_ms: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            cpu_percent_cap: DEFAULT_CPU_PERCENT_CAP,
            mem_mb_cap: DEFAULT_MEM_MB_CAP,
            terminate_grace_ms: DEFAULT_TERMINATE_GRACE_MS,
            max_concurrent_cybers: DEFAULT_MAX_CONCURRENT_CYBERS,
            quota_poll_interval_ms: DEFAULT_QUOTA_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub in_flight_window: usize,
    pub brain_timeout_ms: u64,
    pub signature_cache_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            in_flight_window: DEFAULT_BRIDGE_IN_FLIGHT,
            brain_timeout_ms: DEFAULT_BRAIN_TIMEOUT_MS,
            signature_cache_capacity: DEFAULT_SIGNATURE_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_ROUTER_MAX_RETRIES,
            backoff_base_ms: DEFAULT_ROUTER_BACKOFF_BASE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub token_budget: u32,
    pub content_cache_ttl_secs: u64,
    pub stage_shares: HashMap<String, f64>,
    pub stage_share_floor: f64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            content_cache_ttl_secs: DEFAULT_CONTENT_CACHE_TTL_SECS,
            stage_shares: DEFAULT_STAGE_SHARES
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            stage_share_floor: STAGE_SHARE_FLOOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSettings {
    pub wall_timeout_ms: u64,
    pub cpu_timeout_ms: u64,
    pub output_cap_bytes: usize,
    pub mem_mb_cap: u64,
    pub allowed_modules: Vec<String>,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            wall_timeout_ms: DEFAULT_SCRIPT_WALL_TIMEOUT_MS,
            cpu_timeout_ms: DEFAULT_SCRIPT_CPU_TIMEOUT_MS,
            output_cap_bytes: DEFAULT_SCRIPT_OUTPUT_CAP_BYTES,
            mem_mb_cap: DEFAULT_SCRIPT_MEM_MB_CAP,
            allowed_modules: vec![
                "math".into(),
                "statistics".into(),
                "json".into(),
                "re".into(),
                "datetime".into(),
                "collections".into(),
                "itertools".into(),
                "functools".into(),
            ],
        }
    }
}

/// Top-level settings for the coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the managed `/workspace` tree.
    pub workspace_root: PathBuf,
    /// Source template tree the Template Syncer reconciles against.
    pub template_root: PathBuf,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub script: ScriptSettings,
    #[serde(default)]
    pub ownership: OwnershipTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/workspace"),
            template_root: PathBuf::from("/workspace/.template"),
            sandbox: SandboxSettings::default(),
            bridge: BridgeSettings::default(),
            router: RouterSettings::default(),
            memory: MemorySettings::default(),
            script: ScriptSettings::default(),
            ownership: OwnershipTable::default(),
        }
    }
}

impl Settings {
    pub fn cyber_dir(&self, name: &str) -> PathBuf {
        self.workspace_root.join("cybers").join(name)
    }

    pub fn grid_dir(&self) -> PathBuf {
        self.workspace_root.join("grid")
    }
}
