// Facade objects injected into a restricted Python script's globals (spec
// §4.8): `memory`, `communication`, `tasks`, `environment`. Each wraps a
// handle into `ActionContext` state so a script can do more than pure
// compute, while still only reaching what the sandbox already allows.
//
// These run on the blocking-pool thread `python_sandbox::execute` is spawned
// on, never on the async reactor, so locking `tokio::sync::Mutex` with
// `blocking_lock` here does not stall anything.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::fsutil;
use crate::memory::{BlockDetail, BlockType, MemoryBlock, MemorySystem, Priority, Scope};
use crate::message::{Message, MessageType};
use crate::task::{CommunityTaskStore, Task, TaskType, TodoItem, TodoStatus};

fn to_py_err(err: impl std::fmt::Display) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

/// Shared state every facade needs, threaded in from `ActionContext` by
/// `ExecutePythonScript::execute`.
pub struct FacadeState {
    pub cyber_name: String,
    pub memory: Arc<AsyncMutex<MemorySystem>>,
    pub outbox_dir: PathBuf,
    pub community_tasks: Option<Arc<CommunityTaskStore>>,
    pub workspace_root: PathBuf,
    pub exec_timeout: Duration,
    pub exec_output_cap: usize,
}

/// Inject one instance of each facade into `globals`.
pub fn inject(py: Python<'_>, globals: &Bound<'_, PyDict>, state: &Arc<FacadeState>) -> Result<()> {
    globals.set_item("memory", Py::new(py, MemoryFacade { state: state.clone() })?)?;
    globals.set_item(
        "communication",
        Py::new(py, CommunicationFacade { state: state.clone() })?,
    )?;
    globals.set_item("tasks", Py::new(py, TasksFacade { state: state.clone() })?)?;
    globals.set_item(
        "environment",
        Py::new(py, EnvironmentFacade { state: state.clone() })?,
    )?;
    Ok(())
}

/// Names `build_restricted_globals` injects — excluded from the variable
/// harvest at the end of a run the same way `ALLOWED_MODULES` is.
pub const FACADE_NAMES: &[&str] = &["memory", "communication", "tasks", "environment"];

#[pyclass]
struct MemoryFacade {
    state: Arc<FacadeState>,
}

#[pymethods]
impl MemoryFacade {
    fn read(&self, path: String) -> PyResult<String> {
        let mut memory = self.state.memory.blocking_lock();
        let block = MemoryBlock::new(
            Scope::Personal,
            BlockType::File,
            &path,
            None,
            Priority::Low,
            BlockDetail::File {
                path: PathBuf::from(&path),
                line_range: None,
                content_digest: String::new(),
            },
        );
        memory.content_loader.load(&block).map_err(to_py_err)
    }

    fn write(&self, path: String, content: String) -> PyResult<()> {
        let safe_path = self.safe_path(&path)?;
        fsutil::atomic_write(&safe_path, content.as_bytes()).map_err(to_py_err)
    }

    fn append(&self, path: String, content: String) -> PyResult<()> {
        let safe_path = self.safe_path(&path)?;
        let mut existing = std::fs::read_to_string(&safe_path).unwrap_or_default();
        existing.push_str(&content);
        fsutil::atomic_write(&safe_path, existing.as_bytes()).map_err(to_py_err)
    }

    fn info(&self, py: Python<'_>, path: String) -> PyResult<Py<PyDict>> {
        let safe_path = self.safe_path(&path)?;
        let exists = safe_path.exists();
        let (size, digest) = if exists {
            let bytes = std::fs::read(&safe_path).map_err(to_py_err)?;
            (bytes.len(), fsutil::content_digest(&bytes))
        } else {
            (0, String::new())
        };
        let dict = PyDict::new_bound(py);
        dict.set_item("path", &path)?;
        dict.set_item("exists", exists)?;
        dict.set_item("size", size)?;
        dict.set_item("digest", digest)?;
        Ok(dict.unbind())
    }

    fn list(&self, prefix: Option<String>) -> PyResult<Vec<String>> {
        let memory = self.state.memory.blocking_lock();
        Ok(memory
            .working_memory
            .all()
            .map(|b| b.id.clone())
            .filter(|id| prefix.as_deref().map(|p| id.starts_with(p)).unwrap_or(true))
            .collect())
    }
}

impl MemoryFacade {
    fn safe_path(&self, path: &str) -> PyResult<PathBuf> {
        fsutil::safe_join(&self.state.workspace_root, Path::new(path), &self.state.cyber_name).map_err(to_py_err)
    }
}

#[pyclass]
struct CommunicationFacade {
    state: Arc<FacadeState>,
}

#[pymethods]
impl CommunicationFacade {
    fn send(&self, to: String, subject: String, body: String) -> PyResult<String> {
        let message = Message::new(MessageType::Message, self.state.cyber_name.clone(), to, subject, body);
        message.write_to(&self.state.outbox_dir).map_err(to_py_err)?;
        Ok(message.id)
    }

    fn reply(&self, to: String, in_reply_to: String, body: String) -> PyResult<String> {
        let mut message = Message::new(
            MessageType::Response,
            self.state.cyber_name.clone(),
            to,
            format!("Re: {in_reply_to}"),
            body,
        );
        message.in_reply_to = Some(in_reply_to);
        message.write_to(&self.state.outbox_dir).map_err(to_py_err)?;
        Ok(message.id)
    }

    fn broadcast(&self, recipients: Vec<String>, subject: String, body: String) -> PyResult<Vec<String>> {
        let mut ids = Vec::with_capacity(recipients.len());
        for to in recipients {
            let message = Message::new(
                MessageType::Message,
                self.state.cyber_name.clone(),
                to,
                subject.clone(),
                body.clone(),
            );
            message.write_to(&self.state.outbox_dir).map_err(to_py_err)?;
            ids.push(message.id);
        }
        Ok(ids)
    }
}

#[pyclass]
struct TasksFacade {
    state: Arc<FacadeState>,
}

impl TasksFacade {
    fn store(&self) -> PyResult<&Arc<CommunityTaskStore>> {
        self.state
            .community_tasks
            .as_ref()
            .ok_or_else(|| to_py_err("no community task store configured"))
    }
}

#[pymethods]
impl TasksFacade {
    fn create(&self, summary: String, description: String) -> PyResult<String> {
        let store = self.store()?;
        let task = Task::new(format!("CT-{}", Uuid::new_v4()), summary, description, TaskType::Community);
        store.publish(&task).map_err(to_py_err)?;
        Ok(task.id)
    }

    #[pyo3(signature = (task_id, summary=None, todo_titles=None))]
    fn update(&self, task_id: String, summary: Option<String>, todo_titles: Option<Vec<String>>) -> PyResult<()> {
        let store = self.store()?;
        let todo = todo_titles.map(|titles| {
            titles
                .into_iter()
                .map(|title| TodoItem {
                    title,
                    status: TodoStatus::InProgress,
                })
                .collect()
        });
        store.update(&task_id, summary, todo).map_err(to_py_err)?;
        Ok(())
    }

    fn complete(&self, task_id: String) -> PyResult<()> {
        let store = self.store()?;
        store.complete(&task_id).map_err(to_py_err)?;
        Ok(())
    }

    fn list_open(&self) -> PyResult<Vec<String>> {
        let store = self.store()?;
        Ok(store.list_open().map_err(to_py_err)?.into_iter().map(|t| t.id).collect())
    }
}

#[pyclass]
struct EnvironmentFacade {
    state: Arc<FacadeState>,
}

#[pymethods]
impl EnvironmentFacade {
    #[pyo3(signature = (command, args=Vec::new(), timeout_secs=None))]
    fn exec_command(&self, command: String, args: Vec<String>, timeout_secs: Option<u64>) -> PyResult<(i32, String, String)> {
        let cap = self.state.exec_timeout;
        let timeout = timeout_secs.map(Duration::from_secs).map(|t| t.min(cap)).unwrap_or(cap);
        bounded_exec(&self.state.workspace_root, &command, &args, timeout, self.state.exec_output_cap).map_err(to_py_err)
    }
}

/// Run `command` with `args`, cwd pinned to the cyber's workspace root, and
/// kill it if it outlives `timeout` (spec §4.8 "`environment.exec_command`
/// facade bounded by the sandbox"). Does not drain stdout/stderr until the
/// child exits, so a command writing past the OS pipe buffer before exiting
/// would block rather than be caught by the timeout.
fn bounded_exec(cwd: &Path, command: &str, args: &[String], timeout: Duration, max_output: usize) -> Result<(i32, String, String)> {
    let mut child = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn `{command}`"))?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to poll child status")? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("command `{command}` exceeded the {timeout:?} sandbox deadline");
        }
        std::thread::sleep(Duration::from_millis(20));
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout).context("failed to read child stdout")?;
    }
    if let Some(mut err) = child.stderr.take() {
        err.read_to_string(&mut stderr).context("failed to read child stderr")?;
    }
    stdout.truncate(stdout.len().min(max_output));
    stderr.truncate(stderr.len().min(max_output));
    Ok((status.code().unwrap_or(-1), stdout, stderr))
}
