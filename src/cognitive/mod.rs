// Cognitive Loop (spec §4.7): drives one cyber's four-stage pipeline
// strictly in sequence, double-buffering each stage's output and adapting
// the per-stage token-budget share cycle over cycle with a floor against
// starvation. Grounded on the teacher's `planning/loop_runner.rs` iteration
// shape and `daemon/lifecycle.rs` state tracking.

pub mod pipeline;
pub mod stages;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::action::{ActionContext, ActionCoordinator};
use crate::bridge::request::FileRequestChannel;
use crate::memory::MemorySystem;
use crate::perception::PerceptionScanner;
use pipeline::{PipelineBuffer, StageName};
use stages::StageContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Observing,
    Deciding,
    Executing,
    Reflecting,
    Idle,
    Stopping,
}

/// Per-stage share of the total cycle token budget (spec §4.7 example:
/// observation 25%, decision 25%, execution 10%, reflection 40%).
#[derive(Debug, Clone, Copy)]
pub struct StageShares {
    pub observation: f64,
    pub decision: f64,
    pub execution: f64,
    pub reflection: f64,
}

impl Default for StageShares {
    fn default() -> Self {
        Self {
            observation: 0.25,
            decision: 0.25,
            execution: 0.10,
            reflection: 0.40,
        }
    }
}

const FLOOR_FRACTION: f64 = 0.05;
const STARVATION_BUMP: f64 = 0.05;

impl StageShares {
    fn normalized(&self) -> Self {
        let sum = self.observation + self.decision + self.execution + self.reflection;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            observation: self.observation / sum,
            decision: self.decision / sum,
            execution: self.execution / sum,
            reflection: self.reflection / sum,
        }
    }

    fn budgets(&self, total: u32) -> [u32; 4] {
        let normalized = self.normalized();
        let floor = (total as f64 * FLOOR_FRACTION).round() as u32;
        let shares = [
            normalized.observation,
            normalized.decision,
            normalized.execution,
            normalized.reflection,
        ];
        let remaining = total.saturating_sub(floor * 4);
        let mut budgets = [0u32; 4];
        for (i, share) in shares.iter().enumerate() {
            budgets[i] = floor + (remaining as f64 * share).round() as u32;
        }
        budgets
    }

    /// Bump a starved stage's share for next cycle, stealing proportionally
    /// from the others, so a stage whose brain call keeps aborting gets more
    /// room next time rather than starving indefinitely.
    fn adapt(&mut self, starved: [bool; 4]) {
        let fields = [
            &mut self.observation,
            &mut self.decision,
            &mut self.execution,
            &mut self.reflection,
        ];
        let starved_count = starved.iter().filter(|s| **s).count();
        if starved_count == 0 || starved_count == 4 {
            return;
        }
        let total_bump = STARVATION_BUMP * starved_count as f64;
        let healthy_count = 4 - starved_count;
        let steal_each = total_bump / healthy_count as f64;

        let mut fields = fields;
        for (i, share) in fields.iter_mut().enumerate() {
            if starved[i] {
                **share += STARVATION_BUMP;
            } else {
                **share = (**share - steal_each).max(FLOOR_FRACTION);
            }
        }
    }
}

pub struct CognitiveLoop {
    cyber_name: String,
    memory: Arc<Mutex<MemorySystem>>,
    scanner: PerceptionScanner,
    action_ctx: ActionContext,
    coordinator: Arc<ActionCoordinator>,
    brain_channel: Arc<FileRequestChannel>,
    cancel: CancellationToken,
    model_preset: String,
    activity_log_path: PathBuf,
    workspace_root: PathBuf,
    total_token_budget: u32,
    shares: StageShares,
    cycle: u64,
    state: LoopState,
}

impl CognitiveLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cyber_name: String,
        workspace_root: PathBuf,
        memory: Arc<Mutex<MemorySystem>>,
        scanner: PerceptionScanner,
        action_ctx: ActionContext,
        coordinator: Arc<ActionCoordinator>,
        brain_channel: Arc<FileRequestChannel>,
        cancel: CancellationToken,
        model_preset: String,
        total_token_budget: u32,
    ) -> Self {
        let activity_log_path = workspace_root.join(".internal").join("activity.log");
        Self {
            cyber_name,
            memory,
            scanner,
            action_ctx,
            coordinator,
            brain_channel,
            cancel,
            model_preset,
            activity_log_path,
            workspace_root,
            total_token_budget,
            shares: StageShares::default(),
            cycle: 0,
            state: LoopState::Initializing,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn cycle_number(&self) -> u64 {
        self.cycle
    }

    /// Run one full traversal of the four stages (spec §4.7 "one cycle =
    /// one traversal"). Stages execute strictly in sequence.
    #[instrument(skip(self), fields(cyber = %self.cyber_name, cycle = self.cycle))]
    pub async fn cycle(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.state = LoopState::Stopping;
            return Ok(());
        }

        self.cycle += 1;
        let budgets = self.shares.budgets(self.total_token_budget);

        let stage_ctx = StageContext {
            cyber_name: self.cyber_name.clone(),
            memory: Arc::clone(&self.memory),
            brain_channel: Arc::clone(&self.brain_channel),
            cancel: self.cancel.clone(),
            model_preset: self.model_preset.clone(),
            cycle: self.cycle,
        };

        self.state = LoopState::Observing;
        let observation_buffer = PipelineBuffer::new(&self.workspace_root, StageName::Observation);
        let understanding = stages::observation::run(&stage_ctx, &mut self.scanner, budgets[0]).await?;
        observation_buffer.write_current(&understanding)?;

        self.state = LoopState::Deciding;
        let decision_buffer = PipelineBuffer::new(&self.workspace_root, StageName::Decision);
        let decision = stages::decision::run(&stage_ctx, &understanding, &self.coordinator, budgets[1]).await?;
        decision_buffer.write_current(&decision)?;
        let decision_was_empty = decision.actions.is_empty();

        self.state = LoopState::Executing;
        let execution_buffer = PipelineBuffer::new(&self.workspace_root, StageName::Execution);
        let execution = stages::execution::run(&stage_ctx, &self.action_ctx, &self.coordinator, decision).await?;
        execution_buffer.write_current(&execution)?;
        if execution.short_circuited {
            warn!("execution stage short-circuited on a fatal action failure");
        }

        self.state = LoopState::Reflecting;
        let reflection_buffer = PipelineBuffer::new(&self.workspace_root, StageName::Reflection);
        let reflection = stages::reflection::run(
            &stage_ctx,
            &understanding,
            &execution,
            &self.activity_log_path,
            budgets[2] + budgets[3] / 4,
        )
        .await?;
        reflection_buffer.write_current(&reflection)?;

        pipeline::rotate_all(&self.workspace_root)?;

        self.shares.adapt([
            understanding.aborted,
            decision_was_empty,
            false,
            reflection.insights.is_empty(),
        ]);

        self.state = LoopState::Idle;
        info!(cycle = self.cycle, "cycle completed");
        Ok(())
    }

    /// Run cycles until cancelled (spec §5 "the cognitive loop reaches the
    /// next suspension point, writes a final checkpoint, and exits").
    pub async fn run(&mut self) -> Result<()> {
        while !self.cancel.is_cancelled() {
            self.cycle().await?;
        }
        self.state = LoopState::Stopping;
        let memory = self.memory.lock().await;
        memory.save_snapshot()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budgets_respect_floor_and_sum_close_to_total() {
        let shares = StageShares::default();
        let budgets = shares.budgets(1000);
        for budget in budgets {
            assert!(budget >= 49);
        }
        let total: u32 = budgets.iter().sum();
        assert!((total as i64 - 1000).abs() <= 4);
    }

    #[test]
    fn adapt_bumps_starved_stage_without_exceeding_one() {
        let mut shares = StageShares::default();
        shares.adapt([true, false, false, false]);
        assert!(shares.observation > StageShares::default().observation);
        let sum = shares.observation + shares.decision + shares.execution + shares.reflection;
        assert!(sum > 0.9 && sum < 1.2);
    }

    #[test]
    fn adapt_is_a_no_op_when_nothing_or_everything_starved() {
        let mut shares = StageShares::default();
        let before = (shares.observation, shares.decision, shares.execution, shares.reflection);
        shares.adapt([false, false, false, false]);
        assert_eq!((shares.observation, shares.decision, shares.execution, shares.reflection), before);
        shares.adapt([true, true, true, true]);
        assert_eq!((shares.observation, shares.decision, shares.execution, shares.reflection), before);
    }
}
