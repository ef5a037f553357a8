// Reflection stage (spec §4.7): compact the cycle's results into insights,
// append a one-line activity-log entry, write a new cycle-state block, then
// purge expired observations and trim history beyond the configured window.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;

use super::{invoke_brain, ExecutionOutput, ReflectionOutput, StageContext, Understanding};
use crate::brain::Stage;
use crate::fsutil;
use crate::memory::{BlockDetail, BlockType, MemoryBlock, Priority, Scope};

/// How long an observation block survives before Reflection purges it.
pub const OBSERVATION_RETENTION: ChronoDuration = ChronoDuration::hours(24);

pub async fn run(
    ctx: &StageContext,
    understanding: &Understanding,
    execution: &ExecutionOutput,
    activity_log_path: &Path,
    token_budget: u32,
) -> Result<ReflectionOutput> {
    let results_summary: Vec<String> = execution
        .results
        .iter()
        .map(|r| {
            if r.ok {
                format!("{}: ok", r.action_name)
            } else {
                format!("{}: failed ({})", r.action_name, r.error.clone().unwrap_or_default())
            }
        })
        .collect();

    let mut inputs = BTreeMap::new();
    inputs.insert("understanding".to_string(), "the cycle's pre-execution understanding".to_string());
    inputs.insert("results".to_string(), "what each executed action did".to_string());
    let mut outputs = BTreeMap::new();
    outputs.insert("insights".to_string(), "short list of durable insights worth remembering".to_string());
    outputs.insert("activity_log_entry".to_string(), "one-line summary of this cycle for the activity log".to_string());

    let mut input_values = BTreeMap::new();
    input_values.insert("understanding".to_string(), serde_json::json!(understanding.summary));
    input_values.insert("results".to_string(), serde_json::json!(results_summary));

    let reflection = invoke_brain::<ReflectionOutput>(
        ctx,
        Stage::Reflection,
        "reflect",
        "Summarize what happened this cycle into durable insights and a one-line activity log entry.",
        inputs,
        outputs,
        input_values,
        token_budget,
    )
    .await?
    .unwrap_or_else(|| ReflectionOutput {
        insights: Vec::new(),
        activity_log_entry: format!("cycle {}: {} action(s), brain unavailable", ctx.cycle, execution.results.len()),
    });

    let mut memory = ctx.memory.lock().await;

    for (i, insight) in reflection.insights.iter().enumerate() {
        let semantic_path = format!("cycle/{}/insight/{}", ctx.cycle, i);
        let block = MemoryBlock::new(
            Scope::Personal,
            BlockType::Knowledge,
            &semantic_path,
            None,
            Priority::Medium,
            BlockDetail::Knowledge {
                topic_path: vec!["reflection".to_string(), ctx.cycle.to_string()],
                relevance: 0.8,
            },
        );
        let mut block = block;
        block.metadata.insert("text".to_string(), serde_json::json!(insight));
        memory.working_memory.add(block);
    }

    let cycle_state_path = format!("cycle-state/{}", ctx.cycle);
    let cycle_state = MemoryBlock::new(
        Scope::Personal,
        BlockType::CycleState,
        &cycle_state_path,
        None,
        Priority::Low,
        BlockDetail::Generic,
    );
    memory.working_memory.add(cycle_state);

    let now = chrono::Utc::now();
    memory.working_memory.cleanup_expired(now);
    memory
        .working_memory
        .cleanup_observations_older_than(OBSERVATION_RETENTION, now);
    memory.save_snapshot()?;
    drop(memory);

    append_activity_log(activity_log_path, &reflection.activity_log_entry)?;

    Ok(reflection)
}

fn append_activity_log(path: &Path, entry: &str) -> Result<()> {
    let mut existing = if path.exists() {
        std::fs::read_to_string(path).with_context(|| format!("failed to read activity log {}", path.display()))?
    } else {
        String::new()
    };
    existing.push_str(&format!("{} {}\n", chrono::Utc::now().to_rfc3339(), entry));
    fsutil::atomic_write(path, existing.as_bytes())
}
