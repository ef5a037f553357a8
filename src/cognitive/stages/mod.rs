// Shared stage types and the brain-call helper every stage but Execution
// needs (spec §4.7 stage contracts). Grounded on the teacher's
// `planning/loop_runner.rs` — iterate, call the generator, parse a
// best-effort JSON shape, soft-degrade on a bad response rather than
// aborting the whole loop.

pub mod decision;
pub mod execution;
pub mod observation;
pub mod reflection;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::request::FileRequestChannel;
use crate::brain::{BrainRequest, BrainResponse, RequestContext, Signature, Stage};
use crate::memory::MemorySystem;

/// Shared state every cognitive-loop stage function needs.
pub struct StageContext {
    pub cyber_name: String,
    pub memory: Arc<Mutex<MemorySystem>>,
    pub brain_channel: Arc<FileRequestChannel>,
    pub cancel: CancellationToken,
    pub model_preset: String,
    pub cycle: u64,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Understanding {
    pub summary: String,
    #[serde(default)]
    pub salient_items: Vec<String>,
    #[serde(default)]
    pub candidate_foci: Vec<String>,
    #[serde(default)]
    pub aborted: bool,
}

impl Understanding {
    pub fn aborted() -> Self {
        Self {
            summary: String::new(),
            salient_items: Vec::new(),
            candidate_foci: Vec::new(),
            aborted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct PlannedAction {
    pub action_name: String,
    #[serde(default = "default_params")]
    pub params: Value,
}

fn default_params() -> Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct DecisionOutput {
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct ExecutedActionResult {
    pub action_name: String,
    pub ok: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct ExecutionOutput {
    pub results: Vec<ExecutedActionResult>,
    pub short_circuited: bool,
}

#[derive(Debug, Clone, Default, Serialize, serde::Deserialize)]
pub struct ReflectionOutput {
    #[serde(default)]
    pub insights: Vec<String>,
    pub activity_log_entry: String,
}

/// Send one brain request for `task`, block for the response (racing
/// `ctx.cancel`), and deserialize the `result` output field as `T`. A
/// provider/timeout failure or `aborted` response degrades to `Ok(None)`
/// rather than propagating — stages decide for themselves what an absent
/// brain response means (spec §4.7 "if the brain aborts, mark cycle
/// aborted and proceed to maintenance").
pub async fn invoke_brain<T: DeserializeOwned>(
    ctx: &StageContext,
    stage: Stage,
    phase: &str,
    task: &str,
    inputs: std::collections::BTreeMap<String, String>,
    outputs: std::collections::BTreeMap<String, String>,
    input_values: std::collections::BTreeMap<String, Value>,
    token_budget: u32,
) -> Result<Option<T>> {
    let request_id = Uuid::new_v4().to_string();
    let request = BrainRequest {
        request_id: request_id.clone(),
        signature: Signature {
            task: task.to_string(),
            inputs,
            outputs,
        },
        input_values,
        context: RequestContext {
            cycle: ctx.cycle,
            stage,
            phase: phase.to_string(),
            token_budget,
        },
    };

    ctx.brain_channel
        .write_request(&request_id, &request)
        .context("failed to write brain request")?;

    let response: Option<BrainResponse> = ctx
        .brain_channel
        .await_response(&request_id, &ctx.cancel, Duration::from_millis(50))
        .await
        .context("failed to await brain response")?;

    let Some(response) = response else {
        return Ok(None);
    };
    if response.aborted || response.error.is_some() {
        return Ok(None);
    }

    let raw = Value::Object(
        response
            .output_values
            .into_iter()
            .collect::<serde_json::Map<String, Value>>(),
    );
    match serde_json::from_value(raw) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(None),
    }
}
