// Observation stage (spec §4.7): run the Perception Scanner, fold new
// observations into working memory, build a bounded context, and ask the
// brain to name salient items and candidate foci.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{instrument, warn};

use super::{invoke_brain, StageContext, Understanding};
use crate::brain::Stage;
use crate::memory::{ContextFormat, SelectionStrategy};
use crate::perception::PerceptionScanner;

#[instrument(skip(ctx, scanner), fields(cyber = %ctx.cyber_name, cycle = ctx.cycle))]
pub async fn run(
    ctx: &StageContext,
    scanner: &mut PerceptionScanner,
    token_budget: u32,
) -> Result<Understanding> {
    let observations = scanner.scan()?;
    let blocks = PerceptionScanner::into_memory_blocks(&observations);

    let mut memory = ctx.memory.lock().await;
    for block in blocks {
        memory.working_memory.add(block);
    }

    let context = memory.build_context(
        token_budget,
        None,
        SelectionStrategy::Recent,
        ContextFormat::Structured,
    )?;
    drop(memory);

    let mut inputs = BTreeMap::new();
    inputs.insert("context".to_string(), "recent memory and observations".to_string());
    let mut outputs = BTreeMap::new();
    outputs.insert("summary".to_string(), "one-paragraph understanding of the current situation".to_string());
    outputs.insert("salient_items".to_string(), "short list of the most important items noticed".to_string());
    outputs.insert("candidate_foci".to_string(), "short list of possible things to work on next".to_string());

    let mut input_values = BTreeMap::new();
    input_values.insert("context".to_string(), serde_json::json!(context));

    let understanding = invoke_brain::<Understanding>(
        ctx,
        Stage::Observation,
        "understand",
        "Summarize the cyber's current situation from its memory context and name candidate foci.",
        inputs,
        outputs,
        input_values,
        token_budget,
    )
    .await?;

    match understanding {
        Some(understanding) => Ok(understanding),
        None => {
            warn!("brain aborted during observation stage; proceeding to maintenance");
            Ok(Understanding::aborted())
        }
    }
}
