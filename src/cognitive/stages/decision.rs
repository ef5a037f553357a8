// Decision stage (spec §4.7): given the understanding document and the
// cyber's goals/tasks, ask the brain for an ordered action list. Actions
// whose preconditions are obviously violated (unknown action name, or a
// `send_message`/`create_task` missing its required fields) are dropped
// before the list reaches Execution.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;

use super::{invoke_brain, DecisionOutput, StageContext, Understanding};
use crate::action::ActionCoordinator;
use crate::brain::Stage;
use crate::memory::{ContextFormat, SelectionStrategy};

pub async fn run(
    ctx: &StageContext,
    understanding: &Understanding,
    coordinator: &ActionCoordinator,
    token_budget: u32,
) -> Result<DecisionOutput> {
    if understanding.aborted {
        return Ok(DecisionOutput::default());
    }

    let memory_context = {
        let mut memory = ctx.memory.lock().await;
        memory.build_context(
            token_budget / 2,
            understanding.candidate_foci.first().map(|s| s.as_str()),
            SelectionStrategy::Relevant,
            ContextFormat::Structured,
        )?
    };

    let mut inputs = BTreeMap::new();
    inputs.insert("understanding".to_string(), "the observation stage's summary".to_string());
    inputs.insert("memory_context".to_string(), "relevant goals and tasks".to_string());
    let mut outputs = BTreeMap::new();
    outputs.insert(
        "actions".to_string(),
        "ordered JSON array of {action_name, params} objects to execute this cycle".to_string(),
    );

    let mut input_values = BTreeMap::new();
    input_values.insert("understanding".to_string(), serde_json::json!(understanding.summary));
    input_values.insert("memory_context".to_string(), serde_json::json!(memory_context));

    let decision = invoke_brain::<DecisionOutput>(
        ctx,
        Stage::Decision,
        "decide",
        "Choose an ordered list of actions to run this cycle given the current understanding and goals.",
        inputs,
        outputs,
        input_values,
        token_budget,
    )
    .await?
    .unwrap_or_default();

    let filtered = decision
        .actions
        .into_iter()
        .filter(|action| {
            let valid = coordinator.validate(&action.action_name, &action.params).is_ok();
            if !valid {
                warn!(action = %action.action_name, "decision stage dropped an action with violated preconditions");
            }
            valid
        })
        .collect();

    Ok(DecisionOutput { actions: filtered })
}
