// Execution stage (spec §4.7): run the Decision stage's action list in
// order through the Action Coordinator, recording each result as a new
// observation memory. Short-circuits on the first fatal failure.

use anyhow::Result;

use super::{DecisionOutput, ExecutedActionResult, ExecutionOutput, StageContext};
use crate::action::{ActionContext, ActionCoordinator, ActionRecord};
use crate::memory::{BlockDetail, BlockType, MemoryBlock, Priority, Scope};

pub async fn run(
    ctx: &StageContext,
    action_ctx: &ActionContext,
    coordinator: &ActionCoordinator,
    decision: DecisionOutput,
) -> Result<ExecutionOutput> {
    let records = decision
        .actions
        .into_iter()
        .map(|action| ActionRecord {
            action_name: action.action_name,
            params: action.params,
        })
        .collect();

    let outcomes = coordinator.execute_sequence(action_ctx, records).await;
    let mut results = Vec::with_capacity(outcomes.len());
    let mut short_circuited = false;

    let mut memory = ctx.memory.lock().await;
    for outcome in outcomes {
        let (ok, output, error) = match &outcome.result {
            Ok(value) => (true, Some(value.clone()), None),
            Err(failure) => {
                if failure.is_fatal() {
                    short_circuited = true;
                }
                (false, None, Some(failure.to_string()))
            }
        };

        let semantic_path = format!("action/{}", outcome.action_name);
        let mut block = MemoryBlock::new(
            Scope::Personal,
            BlockType::Observation,
            &semantic_path,
            None,
            if ok { Priority::Low } else { Priority::Medium },
            BlockDetail::Observation {
                observation_kind: if ok { "action_result".to_string() } else { "action_failure".to_string() },
                path: std::path::PathBuf::from(&semantic_path),
                timestamp: chrono::Utc::now(),
            },
        );
        if let Some(error) = &error {
            block.metadata.insert("error".to_string(), serde_json::json!(error));
        }
        if let Some(output) = &output {
            block.metadata.insert("result".to_string(), output.clone());
        }
        memory.working_memory.add(block);

        results.push(ExecutedActionResult {
            action_name: outcome.action_name,
            ok,
            output,
            error,
        });
    }

    Ok(ExecutionOutput {
        results,
        short_circuited,
    })
}
