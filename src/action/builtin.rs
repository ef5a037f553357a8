// Built-in actions (spec §4.8): memory file read/write, messaging, memory
// search, task lifecycle, restricted Python scripts, brain thinking, and a
// timed wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::python_facades::FacadeState;
use super::python_sandbox::{self, PythonSandboxLimits};
use super::{Action, ActionContext, ActionFailure};
use crate::brain::{BrainRequest, RequestContext, Signature, Stage};
use crate::memory::{BlockDetail, MemoryBlock, Priority, Scope};
use crate::message::{Message, MessageType};
use crate::task::{Task, TaskType, TodoItem, TodoStatus};

fn param_str(params: &Value, field: &str) -> Result<String, ActionFailure> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ActionFailure::ParameterInvalid(format!("missing string field `{field}`")))
}

pub struct ReadMemoryFile;

#[async_trait]
impl Action for ReadMemoryFile {
    fn name(&self) -> &str {
        "read_memory_file"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "path").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let path = param_str(&params, "path")?;
        let block = MemoryBlock::new(
            Scope::Personal,
            crate::memory::BlockType::File,
            &path,
            None,
            Priority::Low,
            BlockDetail::File {
                path: std::path::PathBuf::from(&path),
                line_range: None,
                content_digest: String::new(),
            },
        );
        let mut memory = ctx.memory.lock().await;
        let content = memory
            .content_loader
            .load(&block)
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;
        Ok(serde_json::json!({ "path": path, "content": content }))
    }
}

pub struct WriteMemoryFile;

#[async_trait]
impl Action for WriteMemoryFile {
    fn name(&self) -> &str {
        "write_memory_file"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "path")?;
        param_str(params, "content").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let path = param_str(&params, "path")?;
        let content = param_str(&params, "content")?;

        let memory = ctx.memory.lock().await;
        let safe_path = crate::fsutil::safe_join(
            memory.content_loader.workspace_root(),
            std::path::Path::new(&path),
            memory.content_loader.cyber_name(),
        )
        .map_err(|e| ActionFailure::PreconditionFailed(e.to_string()))?;
        drop(memory);

        crate::fsutil::atomic_write(&safe_path, content.as_bytes())
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;
        Ok(serde_json::json!({ "path": path, "bytes_written": content.len() }))
    }
}

pub struct SendMessage;

#[async_trait]
impl Action for SendMessage {
    fn name(&self) -> &str {
        "send_message"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "to")?;
        param_str(params, "subject")?;
        param_str(params, "body").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let to = param_str(&params, "to")?;
        let subject = param_str(&params, "subject")?;
        let body = param_str(&params, "body")?;

        let message = Message::new(MessageType::Message, ctx.cyber_name.clone(), to, subject, body);
        let path = message
            .write_to(&ctx.outbox_dir)
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;
        Ok(serde_json::json!({ "message_id": message.id, "path": path.display().to_string() }))
    }
}

pub struct SearchMemoryByKeywords;

#[async_trait]
impl Action for SearchMemoryByKeywords {
    fn name(&self) -> &str {
        "search_memory_by_keywords"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "query").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let query = param_str(&params, "query")?;
        let budget = params.get("budget").and_then(|v| v.as_u64()).unwrap_or(2_000) as u32;

        let mut memory = ctx.memory.lock().await;
        let rendered = memory
            .build_context(
                budget,
                Some(&query),
                crate::memory::SelectionStrategy::Relevant,
                crate::memory::ContextFormat::Json,
            )
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;
        Ok(serde_json::json!({ "query": query, "results": rendered }))
    }
}

pub struct CreateTask;

#[async_trait]
impl Action for CreateTask {
    fn name(&self) -> &str {
        "create_task"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "summary")?;
        param_str(params, "description").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let store = ctx
            .community_tasks
            .as_ref()
            .ok_or_else(|| ActionFailure::PreconditionFailed("no community task store configured".to_string()))?;
        let summary = param_str(&params, "summary")?;
        let description = param_str(&params, "description")?;
        let id = params
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("CT-{}", Uuid::new_v4()));

        let mut task = Task::new(&id, summary, description, TaskType::Community);
        if let Some(items) = params.get("todo").and_then(|v| v.as_array()) {
            for item in items {
                if let Some(title) = item.as_str() {
                    task.push_todo(TodoItem {
                        title: title.to_string(),
                        status: TodoStatus::NotStarted,
                    })
                    .map_err(|e| ActionFailure::ParameterInvalid(e.to_string()))?;
                }
            }
        }

        store
            .publish(&task)
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;
        Ok(serde_json::json!({ "task_id": task.id }))
    }
}

pub struct CompleteTask;

#[async_trait]
impl Action for CompleteTask {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "task_id").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let store = ctx
            .community_tasks
            .as_ref()
            .ok_or_else(|| ActionFailure::PreconditionFailed("no community task store configured".to_string()))?;
        let task_id = param_str(&params, "task_id")?;
        let task = store
            .complete(&task_id)
            .map_err(|e| ActionFailure::PreconditionFailed(e.to_string()))?;
        Ok(serde_json::json!({ "task_id": task.id, "completed": task.completed }))
    }
}

pub struct UpdateTask;

#[async_trait]
impl Action for UpdateTask {
    fn name(&self) -> &str {
        "update_task"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "task_id").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let store = ctx
            .community_tasks
            .as_ref()
            .ok_or_else(|| ActionFailure::PreconditionFailed("no community task store configured".to_string()))?;
        let task_id = param_str(&params, "task_id")?;
        let summary = params.get("summary").and_then(|v| v.as_str()).map(|s| s.to_string());

        let todo = match params.get("todo").and_then(|v| v.as_array()) {
            Some(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    let title = item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ActionFailure::ParameterInvalid("todo item missing `title`".to_string()))?;
                    let status = match item.get("status").and_then(|v| v.as_str()) {
                        Some("not_started") | None => TodoStatus::NotStarted,
                        Some("in_progress") => TodoStatus::InProgress,
                        Some("done") => TodoStatus::Done,
                        Some("blocked") => TodoStatus::Blocked,
                        Some(other) => return Err(ActionFailure::ParameterInvalid(format!("unknown todo status `{other}`"))),
                    };
                    parsed.push(TodoItem { title: title.to_string(), status });
                }
                Some(parsed)
            }
            None => None,
        };

        let task = store
            .update(&task_id, summary, todo)
            .map_err(|e| ActionFailure::PreconditionFailed(e.to_string()))?;
        Ok(serde_json::json!({ "task_id": task.id, "updated": task.updated }))
    }
}

pub struct ExecutePythonScript;

#[async_trait]
impl Action for ExecutePythonScript {
    fn name(&self) -> &str {
        "execute_python_script"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "source").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let source = param_str(&params, "source")?;
        let persist = params.get("persist_variables").and_then(|v| v.as_bool()).unwrap_or(false);

        let persisted = if persist {
            Some(ctx.script_variables.lock().await.clone())
        } else {
            None
        };

        let workspace_root = {
            let memory = ctx.memory.lock().await;
            memory.content_loader.workspace_root().to_path_buf()
        };
        let facades = Arc::new(FacadeState {
            cyber_name: ctx.cyber_name.clone(),
            memory: Arc::clone(&ctx.memory),
            outbox_dir: ctx.outbox_dir.clone(),
            community_tasks: ctx.community_tasks.clone(),
            workspace_root,
            exec_timeout: Duration::from_secs(5),
            exec_output_cap: 64 * 1024,
        });

        let result = python_sandbox::execute_with_deadline(source, persisted, PythonSandboxLimits::default(), facades)
            .await
            .map_err(|e| {
                if e.to_string().contains("deadline") {
                    ActionFailure::Timeout(e.to_string())
                } else {
                    ActionFailure::RuntimeError(e.to_string())
                }
            })?;

        if persist {
            *ctx.script_variables.lock().await = result.variables.clone();
        }

        Ok(serde_json::json!({
            "stdout": result.stdout,
            "stderr": result.stderr,
            "variables": result.variables,
            "truncated": result.truncated,
        }))
    }
}

pub struct InvokeBrainThinking;

#[async_trait]
impl Action for InvokeBrainThinking {
    fn name(&self) -> &str {
        "invoke_brain_thinking"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        param_str(params, "task").map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let channel = ctx
            .brain_channel
            .as_ref()
            .ok_or_else(|| ActionFailure::PreconditionFailed("no brain channel configured".to_string()))?;
        let task = param_str(&params, "task")?;

        let mut inputs = std::collections::BTreeMap::new();
        let mut input_values = std::collections::BTreeMap::new();
        if let Some(object) = params.get("inputs").and_then(|v| v.as_object()) {
            for (key, description) in object {
                inputs.insert(key.clone(), description.as_str().unwrap_or("").to_string());
            }
        }
        if let Some(object) = params.get("input_values").and_then(|v| v.as_object()) {
            for (key, value) in object {
                input_values.insert(key.clone(), value.clone());
            }
        }
        let mut outputs = std::collections::BTreeMap::new();
        outputs.insert("result".to_string(), "the answer".to_string());

        let request_id = Uuid::new_v4().to_string();
        let request = BrainRequest {
            request_id: request_id.clone(),
            signature: Signature { task, inputs, outputs },
            input_values,
            context: RequestContext {
                cycle: 0,
                stage: Stage::Execution,
                phase: "action".to_string(),
                token_budget: params.get("token_budget").and_then(|v| v.as_u64()).unwrap_or(500) as u32,
            },
        };

        channel
            .write_request(&request_id, &request)
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?;

        let response = channel
            .await_response::<crate::brain::BrainResponse>(&request_id, &ctx.cancel, Duration::from_millis(50))
            .await
            .map_err(|e| ActionFailure::RuntimeError(e.to_string()))?
            .ok_or_else(|| ActionFailure::Timeout("brain request cancelled before a response arrived".to_string()))?;

        if response.aborted {
            return Err(ActionFailure::RuntimeError("brain request aborted".to_string()));
        }
        Ok(serde_json::to_value(response.output_values).unwrap_or(Value::Null))
    }
}

pub struct WaitWithTimeout;

#[async_trait]
impl Action for WaitWithTimeout {
    fn name(&self) -> &str {
        "wait_with_timeout"
    }

    fn validate(&self, params: &Value) -> Result<(), ActionFailure> {
        params
            .get("seconds")
            .and_then(|v| v.as_u64())
            .map(|_| ())
            .ok_or_else(|| ActionFailure::ParameterInvalid("missing numeric field `seconds`".to_string()))
    }

    async fn execute(&self, ctx: &ActionContext, params: Value) -> Result<Value, ActionFailure> {
        let seconds = params.get("seconds").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ActionFailure::Timeout("wait cancelled by shutdown".to_string())),
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => Ok(serde_json::json!({"waited_seconds": seconds})),
        }
    }
}

/// Register every built-in action (spec §4.8's list, verbatim).
pub fn register_all(coordinator: &mut super::ActionCoordinator) {
    coordinator.register(std::sync::Arc::new(ReadMemoryFile));
    coordinator.register(std::sync::Arc::new(WriteMemoryFile));
    coordinator.register(std::sync::Arc::new(SendMessage));
    coordinator.register(std::sync::Arc::new(SearchMemoryByKeywords));
    coordinator.register(std::sync::Arc::new(CreateTask));
    coordinator.register(std::sync::Arc::new(CompleteTask));
    coordinator.register(std::sync::Arc::new(UpdateTask));
    coordinator.register(std::sync::Arc::new(ExecutePythonScript));
    coordinator.register(std::sync::Arc::new(InvokeBrainThinking));
    coordinator.register(std::sync::Arc::new(WaitWithTimeout));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionContext, ActionCoordinator};
    use crate::memory::MemorySystem;
    use tokio::sync::Mutex;

    fn context_in(dir: &std::path::Path) -> ActionContext {
        ActionContext {
            cyber_name: "alice".to_string(),
            memory: Arc::new(Mutex::new(MemorySystem::new(
                dir.to_path_buf(),
                "alice".to_string(),
                dir.join("snapshot.json"),
                Duration::from_secs(60),
            ))),
            outbox_dir: dir.join("outbox"),
            community_tasks: None,
            script_variables: Mutex::new(serde_json::Map::new()),
            brain_channel: None,
            cancel: tokio_util::sync::CancellationToken::new(),
            model_preset: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn write_then_read_memory_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        let mut coordinator = ActionCoordinator::new();
        register_all(&mut coordinator);

        coordinator
            .execute(&ctx, "write_memory_file", serde_json::json!({"path": "notes.md", "content": "hi"}), None)
            .await
            .unwrap();

        let result = coordinator
            .execute(&ctx, "read_memory_file", serde_json::json!({"path": "notes.md"}), None)
            .await
            .unwrap();
        assert_eq!(result["content"], serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn send_message_writes_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        let mut coordinator = ActionCoordinator::new();
        register_all(&mut coordinator);

        coordinator
            .execute(
                &ctx,
                "send_message",
                serde_json::json!({"to": "bob", "subject": "hi", "body": "hello"}),
                None,
            )
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(&ctx.outbox_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn execute_python_script_runs_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        let mut coordinator = ActionCoordinator::new();
        register_all(&mut coordinator);

        let result = coordinator
            .execute(&ctx, "execute_python_script", serde_json::json!({"source": "print(1+1)"}), None)
            .await
            .unwrap();
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "2");
    }

    #[tokio::test]
    async fn update_task_mutates_a_claimed_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_in(dir.path());
        let store = crate::task::CommunityTaskStore::new(&dir.path().join("tasks"));
        store
            .publish(&Task::new("CT-001", "old summary", "details", TaskType::Community))
            .unwrap();
        store.claim("CT-001", "alice").unwrap();
        ctx.community_tasks = Some(Arc::new(store));

        let mut coordinator = ActionCoordinator::new();
        register_all(&mut coordinator);

        let result = coordinator
            .execute(
                &ctx,
                "update_task",
                serde_json::json!({
                    "task_id": "CT-001",
                    "summary": "new summary",
                    "todo": [{"title": "step one", "status": "in_progress"}],
                }),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result["task_id"], serde_json::json!("CT-001"));

        let claimed = ctx.community_tasks.as_ref().unwrap().list_claimed_by("alice").unwrap();
        assert_eq!(claimed[0].summary, "new summary");
        assert_eq!(claimed[0].todo[0].status, TodoStatus::InProgress);
    }

    #[tokio::test]
    async fn missing_required_param_is_parameter_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        let mut coordinator = ActionCoordinator::new();
        register_all(&mut coordinator);

        let result = coordinator
            .execute(&ctx, "send_message", serde_json::json!({"to": "bob"}), None)
            .await;
        assert!(matches!(result, Err(ActionFailure::ParameterInvalid(_))));
    }
}
