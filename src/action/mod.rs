// Action Coordinator (spec §4.8): register/validate/execute built-in
// actions, resolving `@last` references and applying parameter-alias
// correction before running. Grounded on the teacher's tool registry +
// executor split (`tools/registry.rs` + `tools/executor.rs`).

pub mod builtin;
pub mod python_facades;
pub mod python_sandbox;
pub mod reference;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::bridge::request::FileRequestChannel;
use crate::memory::MemorySystem;
use crate::task::CommunityTaskStore;

/// Failure taxonomy (spec §4.8): distinguishes corrigible input errors
/// from genuine runtime failures so the Execution stage knows whether to
/// short-circuit the remaining action sequence.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionFailure {
    #[error("parameter invalid: {0}")]
    ParameterInvalid(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("runtime error: {0}")]
    RuntimeError(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl ActionFailure {
    /// Only `RuntimeError`/`Timeout` abort the rest of an action sequence
    /// (spec §4.8 "Short-circuit on fatal error... non-fatal errors do not
    /// abort the sequence").
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionFailure::RuntimeError(_) | ActionFailure::Timeout(_))
    }
}

/// Shared state every built-in action may touch.
pub struct ActionContext {
    pub cyber_name: String,
    pub memory: Arc<Mutex<MemorySystem>>,
    pub outbox_dir: std::path::PathBuf,
    pub community_tasks: Option<Arc<CommunityTaskStore>>,
    pub script_variables: Mutex<serde_json::Map<String, Value>>,
    pub brain_channel: Option<Arc<FileRequestChannel>>,
    pub cancel: tokio_util::sync::CancellationToken,
    pub model_preset: String,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap, synchronous structural validation — the Decision stage's
    /// "never emit an action whose preconditions are obviously violated"
    /// check relies on this running before execution too.
    fn validate(&self, params: &Value) -> Result<(), ActionFailure>;

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure>;
}

pub struct ActionRecord {
    pub action_name: String,
    pub params: Value,
}

pub struct ActionOutcome {
    pub action_name: String,
    pub result: Result<Value, ActionFailure>,
}

pub struct ActionCoordinator {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl Default for ActionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCoordinator {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn validate(&self, action_name: &str, params: &Value) -> Result<(), ActionFailure> {
        let action = self
            .actions
            .get(action_name)
            .ok_or_else(|| ActionFailure::PreconditionFailed(format!("unknown action `{action_name}`")))?;
        action.validate(params)
    }

    /// Run one action, resolving `@last` against `previous_result` first.
    #[instrument(skip(self, ctx, params, previous_result), fields(action = %action_name))]
    pub async fn execute(
        &self,
        ctx: &ActionContext,
        action_name: &str,
        params: Value,
        previous_result: Option<&Value>,
    ) -> Result<Value, ActionFailure> {
        let action = self
            .actions
            .get(action_name)
            .ok_or_else(|| ActionFailure::PreconditionFailed(format!("unknown action `{action_name}`")))?;

        let resolved = reference::resolve(&params, previous_result);
        action.validate(&resolved)?;
        action.execute(ctx, resolved).await
    }

    /// Run an ordered list of actions, short-circuiting on the first fatal
    /// failure (spec §4.7 Execution stage contract).
    pub async fn execute_sequence(
        &self,
        ctx: &ActionContext,
        actions: Vec<ActionRecord>,
    ) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        let mut previous_result: Option<Value> = None;

        for record in actions {
            let result = self
                .execute(ctx, &record.action_name, record.params, previous_result.as_ref())
                .await;

            let fatal = matches!(&result, Err(failure) if failure.is_fatal());
            if let Ok(value) = &result {
                previous_result = Some(value.clone());
            }
            if fatal {
                if let Err(failure) = &result {
                    warn!(action = %record.action_name, error = %failure, "fatal action failure, short-circuiting sequence");
                }
            }

            outcomes.push(ActionOutcome {
                action_name: record.action_name,
                result,
            });

            if fatal {
                break;
            }
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl Action for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }
        fn validate(&self, _params: &Value) -> Result<(), ActionFailure> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ActionContext, _params: Value) -> Result<Value, ActionFailure> {
            Err(ActionFailure::RuntimeError("boom".to_string()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn validate(&self, _params: &Value) -> Result<(), ActionFailure> {
            Ok(())
        }
        async fn execute(&self, _ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
            Ok(params)
        }
    }

    fn test_context() -> ActionContext {
        let dir = tempfile::tempdir().unwrap();
        ActionContext {
            cyber_name: "alice".to_string(),
            memory: Arc::new(Mutex::new(MemorySystem::new(
                dir.path().to_path_buf(),
                "alice".to_string(),
                dir.path().join("snapshot.json"),
                std::time::Duration::from_secs(60),
            ))),
            outbox_dir: dir.path().join("outbox"),
            community_tasks: None,
            script_variables: Mutex::new(serde_json::Map::new()),
            brain_channel: None,
            cancel: tokio_util::sync::CancellationToken::new(),
            model_preset: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_action_is_a_precondition_failure() {
        let coordinator = ActionCoordinator::new();
        let ctx = test_context();
        let result = coordinator.execute(&ctx, "nonexistent", serde_json::json!({}), None).await;
        assert!(matches!(result, Err(ActionFailure::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn sequence_short_circuits_on_fatal_error() {
        let mut coordinator = ActionCoordinator::new();
        coordinator.register(Arc::new(AlwaysFails));
        coordinator.register(Arc::new(Echo));
        let ctx = test_context();

        let outcomes = coordinator
            .execute_sequence(
                &ctx,
                vec![
                    ActionRecord {
                        action_name: "always_fails".to_string(),
                        params: serde_json::json!({}),
                    },
                    ActionRecord {
                        action_name: "echo".to_string(),
                        params: serde_json::json!({"x": 1}),
                    },
                ],
            )
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());
    }

    #[tokio::test]
    async fn last_reference_resolves_from_previous_action() {
        let mut coordinator = ActionCoordinator::new();
        coordinator.register(Arc::new(Echo));
        let ctx = test_context();

        let outcomes = coordinator
            .execute_sequence(
                &ctx,
                vec![
                    ActionRecord {
                        action_name: "echo".to_string(),
                        params: serde_json::json!({"value": 42}),
                    },
                    ActionRecord {
                        action_name: "echo".to_string(),
                        params: serde_json::json!("@last.value"),
                    },
                ],
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(*outcomes[1].result.as_ref().unwrap(), serde_json::json!(42));
    }
}
