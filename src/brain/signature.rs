// Signature compilation and hashing (spec §4.9 "construct or fetch a
// compiled signature keyed by the content hash of the signature
// specification").

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The `signature` field of a brain request: task description plus named
/// inputs/outputs. A `BTreeMap` keeps key order stable so the content hash
/// is reproducible (spec §4.9 invariant (a)).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    pub task: String,
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

impl Signature {
    /// Content hash of the signature spec, used as the compiled-signature
    /// cache key.
    pub fn content_hash(&self) -> String {
        let canonical =
            serde_json::to_vec(self).expect("Signature serialization is infallible");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    pub fn validate_inputs(
        &self,
        input_values: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), String> {
        for key in self.inputs.keys() {
            if !input_values.contains_key(key) {
                return Err(format!("missing required input `{key}`"));
            }
        }
        Ok(())
    }
}

/// A signature translated into the prompt text sent to an [`LlmProvider`].
/// Compilation is pure and deterministic given the same signature + input
/// values + model preset (spec §4.9 invariant (a)).
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub prompt: String,
}

pub fn compile(
    signature: &Signature,
    input_values: &BTreeMap<String, serde_json::Value>,
    model_preset: &str,
) -> CompiledSignature {
    let mut prompt = format!("Task: {}\nModel preset: {model_preset}\n\n", signature.task);
    for (name, description) in &signature.inputs {
        let value = input_values
            .get(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<missing>".to_string());
        prompt.push_str(&format!("Input `{name}` ({description}): {value}\n"));
    }
    prompt.push_str("\nProduce outputs:\n");
    for (name, description) in &signature.outputs {
        prompt.push_str(&format!("- `{name}`: {description}\n"));
    }
    CompiledSignature { prompt }
}
