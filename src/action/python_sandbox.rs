// Restricted Python script execution (spec §4.8, "the subtlest action"):
// curated safe-builtins table, explicit module allow-list, an AST
// pre-scan rejecting dangerous attribute access, CPU/wall-clock deadlines,
// a peak-memory cap, and captured stdout/stderr with size caps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::python_facades::{self, FacadeState};

/// Modules a script may `import` (spec §4.8 list, verbatim).
const ALLOWED_MODULES: &[&str] = &[
    "math",
    "statistics",
    "json",
    "re",
    "datetime",
    "collections",
    "itertools",
    "functools",
];

/// Attribute names that reach outside the restricted namespace (dunder
/// escape hatches used by every public Python sandbox-escape writeup).
const FORBIDDEN_ATTRIBUTES: &[&str] = &[
    "__globals__",
    "__builtins__",
    "__import__",
    "__subclasses__",
    "__bases__",
    "__mro__",
    "__class__",
    "__dict__",
    "__getattribute__",
    "__reduce__",
    "__reduce_ex__",
    "__init_subclass__",
];

#[derive(Debug, Clone)]
pub struct PythonSandboxLimits {
    pub wall_clock: Duration,
    pub cpu_time: Duration,
    pub max_memory_bytes: u64,
    pub max_output_bytes: usize,
}

impl Default for PythonSandboxLimits {
    fn default() -> Self {
        Self {
            wall_clock: Duration::from_secs(5),
            cpu_time: Duration::from_secs(5),
            max_memory_bytes: 128 * 1024 * 1024,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub truncated: bool,
}

/// Pre-scan a script for attribute access to names in
/// [`FORBIDDEN_ATTRIBUTES`] using Python's own `ast` module — far more
/// reliable than a Rust-side regex over source text.
fn reject_dangerous_attributes(py: Python<'_>, source: &str) -> Result<()> {
    let ast = py.import_bound("ast").context("ast module unavailable")?;
    let tree = ast
        .call_method1("parse", (source,))
        .context("script contains a syntax error")?;

    let scanner = py
        .eval_bound(
            r#"
lambda tree, forbidden: [
    node.attr
    for node in __import__("ast").walk(tree)
    if isinstance(node, __import__("ast").Attribute) and node.attr in forbidden
]
"#,
            None,
            None,
        )
        .context("failed to build attribute scanner")?;

    let hits: Vec<String> = scanner
        .call1((tree, PyList::new_bound(py, FORBIDDEN_ATTRIBUTES)))
        .context("attribute scan failed")?
        .extract()
        .context("attribute scan returned an unexpected type")?;

    if !hits.is_empty() {
        bail!("script accesses forbidden attribute(s): {}", hits.join(", "));
    }
    Ok(())
}

fn build_restricted_globals<'py>(
    py: Python<'py>,
    persisted: Option<&serde_json::Map<String, serde_json::Value>>,
    facades: &Arc<FacadeState>,
) -> Result<Bound<'py, PyDict>> {
    let builtins = py.import_bound("builtins").context("builtins module unavailable")?;
    let safe_names = [
        "abs", "all", "any", "bool", "dict", "enumerate", "filter", "float", "int", "len", "list",
        "map", "max", "min", "range", "repr", "reversed", "round", "set", "sorted", "str", "sum",
        "tuple", "zip", "True", "False", "None", "print",
    ];
    let safe_builtins = PyDict::new_bound(py);
    for name in safe_names {
        if let Ok(value) = builtins.getattr(name) {
            safe_builtins.set_item(name, value)?;
        }
    }

    let globals = PyDict::new_bound(py);
    globals.set_item("__builtins__", safe_builtins)?;

    for module_name in ALLOWED_MODULES {
        if let Ok(module) = py.import_bound(*module_name) {
            globals.set_item(*module_name, module)?;
        }
    }

    if let Some(vars) = persisted {
        for (key, value) in vars {
            globals.set_item(key, python_value_from_json(py, value)?)?;
        }
    }

    python_facades::inject(py, &globals, facades)?;

    Ok(globals)
}

/// Lower `RLIMIT_AS` to `max_memory_bytes` for the duration of the script
/// run (spec §4.8 item (e)), returning the previous (soft, hard) limits so
/// the caller can restore them once the script finishes. Unix-only, like
/// the rest of this crate's process-resource handling (`sandbox::quota`).
/// This bounds the whole process's address space, not just the
/// interpreter's — it is restored immediately after the run so it cannot
/// ratchet down across calls.
fn lower_memory_limit(resource: &Bound<'_, PyModule>, max_memory_bytes: u64) -> Result<(i64, i64)> {
    let rlimit_as = resource.getattr("RLIMIT_AS").context("RLIMIT_AS unavailable")?;
    let previous: (i64, i64) = resource
        .call_method1("getrlimit", (rlimit_as.clone(),))
        .context("failed to read current RLIMIT_AS")?
        .extract()
        .context("RLIMIT_AS has an unexpected shape")?;

    let (_, hard) = previous;
    let soft = if hard >= 0 {
        (max_memory_bytes as i64).min(hard)
    } else {
        max_memory_bytes as i64
    };

    resource
        .call_method1("setrlimit", (rlimit_as, (soft, hard)))
        .context("failed to lower RLIMIT_AS for script execution")?;
    Ok(previous)
}

fn restore_memory_limit(resource: &Bound<'_, PyModule>, previous: (i64, i64)) {
    match resource.getattr("RLIMIT_AS") {
        Ok(rlimit_as) => {
            if let Err(err) = resource.call_method1("setrlimit", (rlimit_as, previous)) {
                warn!(error = %err, "failed to restore RLIMIT_AS after script execution");
            }
        }
        Err(err) => warn!(error = %err, "failed to look up RLIMIT_AS while restoring memory limit"),
    }
}

fn python_value_from_json<'py>(py: Python<'py>, value: &serde_json::Value) -> Result<PyObject> {
    let json_text = serde_json::to_string(value)?;
    let json_module = py.import_bound("json")?;
    let loaded = json_module.call_method1("loads", (json_text,))?;
    Ok(loaded.into())
}

fn json_from_python_value(py: Python<'_>, value: &Bound<'_, PyAny>) -> Result<serde_json::Value> {
    let json_module = py.import_bound("json")?;
    let dumped: String = json_module
        .call_method1("dumps", (value,))
        .context("failed to serialize python value back to json")?
        .extract()?;
    let _ = py;
    Ok(serde_json::from_str(&dumped)?)
}

/// Execute `source` in a restricted namespace and return captured output
/// plus any variables the script set at module scope. CPU/wall-clock
/// deadlines are enforced by the caller (`execute_with_deadline`), which
/// runs this on a blocking thread so the deadline can fire independently
/// of the GIL.
pub fn execute(
    source: &str,
    persisted: Option<&serde_json::Map<String, serde_json::Value>>,
    limits: &PythonSandboxLimits,
    facades: &Arc<FacadeState>,
) -> Result<PythonExecutionResult> {
    Python::with_gil(|py| {
        reject_dangerous_attributes(py, source)?;

        let globals = build_restricted_globals(py, persisted, facades)?;
        let sys = py.import_bound("sys").context("sys module unavailable")?;
        let io = py.import_bound("io").context("io module unavailable")?;
        let stdout_capture = io.call_method0("StringIO")?;
        let stderr_capture = io.call_method0("StringIO")?;
        let original_stdout = sys.getattr("stdout")?;
        let original_stderr = sys.getattr("stderr")?;
        sys.setattr("stdout", &stdout_capture)?;
        sys.setattr("stderr", &stderr_capture)?;

        let memory_guard = if limits.max_memory_bytes > 0 {
            py.import_bound("resource")
                .ok()
                .and_then(|resource| lower_memory_limit(&resource, limits.max_memory_bytes).ok().map(|previous| (resource, previous)))
        } else {
            None
        };

        let run_result = py.run_bound(source, Some(&globals), None);

        if let Some((resource, previous)) = memory_guard {
            restore_memory_limit(&resource, previous);
        }

        sys.setattr("stdout", original_stdout)?;
        sys.setattr("stderr", original_stderr)?;

        run_result.context("python script raised an exception")?;

        let mut stdout: String = stdout_capture.call_method0("getvalue")?.extract()?;
        let mut stderr: String = stderr_capture.call_method0("getvalue")?.extract()?;
        let mut truncated = false;
        if stdout.len() > limits.max_output_bytes {
            stdout.truncate(limits.max_output_bytes);
            truncated = true;
        }
        if stderr.len() > limits.max_output_bytes {
            stderr.truncate(limits.max_output_bytes);
            truncated = true;
        }

        let mut variables = serde_json::Map::new();
        for (key, value) in globals.iter() {
            let key: String = key.extract()?;
            if key.starts_with("__")
                || ALLOWED_MODULES.contains(&key.as_str())
                || python_facades::FACADE_NAMES.contains(&key.as_str())
            {
                continue;
            }
            if let Ok(json_value) = json_from_python_value(py, &value) {
                variables.insert(key, json_value);
            }
        }

        Ok(PythonExecutionResult {
            stdout,
            stderr,
            variables,
            truncated,
        })
    })
}

/// Run `execute` on a blocking thread with a wall-clock deadline. CPU-time
/// enforcement is delegated to the host's per-cyber process resource caps
/// (spec §4.1); this deadline guards against a script that merely hangs.
pub async fn execute_with_deadline(
    source: String,
    persisted: Option<serde_json::Map<String, serde_json::Value>>,
    limits: PythonSandboxLimits,
    facades: Arc<FacadeState>,
) -> Result<PythonExecutionResult> {
    let started = Instant::now();
    let deadline = limits.wall_clock;
    let handle = tokio::task::spawn_blocking(move || execute(&source, persisted.as_ref(), &limits, &facades));

    match tokio::time::timeout(deadline, handle).await {
        Ok(join_result) => join_result.context("python execution task panicked")?,
        Err(_) => bail!(
            "python script exceeded wall-clock deadline of {:?} (ran {:?})",
            deadline,
            started.elapsed()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySystem;
    use tokio::sync::Mutex as AsyncMutex;

    fn test_facades() -> Arc<FacadeState> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FacadeState {
            cyber_name: "alice".to_string(),
            memory: Arc::new(AsyncMutex::new(MemorySystem::new(
                dir.path().to_path_buf(),
                "alice".to_string(),
                dir.path().join("snapshot.json"),
                Duration::from_secs(60),
            ))),
            outbox_dir: dir.path().join("outbox"),
            community_tasks: None,
            workspace_root: dir.path().to_path_buf(),
            exec_timeout: Duration::from_secs(2),
            exec_output_cap: 4096,
        })
    }

    #[test]
    fn executes_simple_arithmetic_and_captures_stdout() {
        let result = execute("print(2 + 2)", None, &PythonSandboxLimits::default(), &test_facades()).unwrap();
        assert_eq!(result.stdout.trim(), "4");
    }

    #[test]
    fn rejects_dunder_globals_access() {
        let result = execute(
            "x = (1).__class__.__mro__",
            None,
            &PythonSandboxLimits::default(),
            &test_facades(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn persists_variables_across_calls() {
        let limits = PythonSandboxLimits::default();
        let facades = test_facades();
        let first = execute("x = 10", None, &limits, &facades).unwrap();
        let second = execute("y = x + 5", Some(&first.variables), &limits, &facades).unwrap();
        assert_eq!(second.variables.get("y"), Some(&serde_json::json!(15)));
    }

    #[test]
    fn facade_objects_do_not_leak_into_harvested_variables() {
        let result = execute("m = memory", None, &PythonSandboxLimits::default(), &test_facades()).unwrap();
        assert!(!result.variables.contains_key("memory"));
    }

    #[test]
    fn memory_facade_writes_reach_the_workspace() {
        let facades = test_facades();
        execute(
            "memory.write('notes.md', 'hello from the sandbox')",
            None,
            &PythonSandboxLimits::default(),
            &facades,
        )
        .unwrap();
        let content = std::fs::read_to_string(facades.workspace_root.join("notes.md")).unwrap();
        assert_eq!(content, "hello from the sandbox");
    }

    #[test]
    fn communication_facade_send_writes_to_outbox() {
        let facades = test_facades();
        std::fs::create_dir_all(&facades.outbox_dir).unwrap();
        execute(
            "communication.send('bob', 'hi', 'hello')",
            None,
            &PythonSandboxLimits::default(),
            &facades,
        )
        .unwrap();
        let entries: Vec<_> = std::fs::read_dir(&facades.outbox_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn wall_clock_deadline_aborts_long_running_script() {
        // Bounded rather than infinite: the timeout races the blocking
        // task rather than relying on being able to kill it, so the test
        // must not leave a thread spinning forever after it returns.
        let limits = PythonSandboxLimits {
            wall_clock: Duration::from_millis(50),
            ..Default::default()
        };
        let result = execute_with_deadline(
            "total = 0\nfor i in range(200_000_000):\n    total += i".to_string(),
            None,
            limits,
            test_facades(),
        )
        .await;
        assert!(result.is_err());
    }
}
