// Brain Protocol (spec §4.9): the filesystem-mediated request/response
// channel a cyber uses to reach an LLM outside its sandbox. This module
// owns the wire types and the bridge-side server that turns a request into
// a provider call; the cyber-side file I/O lives in `bridge`.

pub mod cache;
pub mod server;
pub mod signature;

pub use server::BrainServer;
pub use signature::Signature;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where in the cognitive loop a brain request originated — carried through
/// so token accounting and logs can attribute usage per stage (spec §4.7
/// "records per-stage token usage").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Observation,
    Decision,
    Execution,
    Reflection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub cycle: u64,
    pub stage: Stage,
    pub phase: String,
    pub token_budget: u32,
}

/// Request file format (spec §6 / §4.9): written by the cyber into its
/// `brain` special file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainRequest {
    pub request_id: String,
    pub signature: Signature,
    pub input_values: BTreeMap<String, serde_json::Value>,
    pub context: RequestContext,
}

/// Response file format (spec §6 / §4.9): written by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainResponse {
    pub request_id: String,
    #[serde(default)]
    pub output_values: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shutdown: bool,
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl BrainResponse {
    pub fn aborted(request_id: impl Into<String>, shutdown: bool) -> Self {
        Self {
            request_id: request_id.into(),
            output_values: BTreeMap::new(),
            aborted: true,
            shutdown,
            token_usage: TokenUsage::default(),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            output_values: BTreeMap::new(),
            aborted: false,
            shutdown: false,
            token_usage: TokenUsage::default(),
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_originating_request_id() {
        let response = BrainResponse::aborted("req-123", true);
        assert_eq!(response.request_id, "req-123");
        assert!(response.aborted);
        assert!(response.shutdown);
    }
}
