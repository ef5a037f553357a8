// Community Task (spec §3, §4.8 task actions): JSON files living in one of
// `open/`, `claimed/`, `completed/`. Claim is an atomic move from `open/`
// to `claimed/` (rename-as-lock, spec §5) — the move itself decides the
// race, not a field written afterward.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Hobby,
    Maintenance,
    Community,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum TodoStatus {
    NotStarted,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub summary: String,
    pub description: String,
    pub task_type: TaskType,
    pub todo: Vec<TodoItem>,
    pub current: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, summary: impl Into<String>, description: impl Into<String>, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            summary: summary.into(),
            description: description.into(),
            task_type,
            todo: Vec::new(),
            current: false,
            created: now,
            updated: now,
            claimed_by: None,
            claimed_at: None,
            completed: None,
        }
    }

    /// Spec: at most 10 todo items per task.
    pub fn push_todo(&mut self, item: TodoItem) -> Result<()> {
        if self.todo.len() >= 10 {
            bail!("task {} already has the maximum of 10 todo items", self.id);
        }
        self.todo.push(item);
        Ok(())
    }
}

pub struct CommunityTaskStore {
    open_dir: PathBuf,
    claimed_dir: PathBuf,
    completed_dir: PathBuf,
}

impl CommunityTaskStore {
    pub fn new(root: &Path) -> Self {
        Self {
            open_dir: root.join("open"),
            claimed_dir: root.join("claimed"),
            completed_dir: root.join("completed"),
        }
    }

    fn file_name(task_id: &str) -> String {
        format!("{task_id}.json")
    }

    pub fn publish(&self, task: &Task) -> Result<()> {
        std::fs::create_dir_all(&self.open_dir)?;
        let path = self.open_dir.join(Self::file_name(&task.id));
        let json = serde_json::to_vec_pretty(task).context("failed to serialize task")?;
        fsutil::atomic_write(&path, &json)
    }

    pub fn list_open(&self) -> Result<Vec<Task>> {
        Self::list_dir(&self.open_dir)
    }

    pub fn list_claimed_by(&self, cyber_name: &str) -> Result<Vec<Task>> {
        Ok(Self::list_dir(&self.claimed_dir)?
            .into_iter()
            .filter(|t| t.claimed_by.as_deref() == Some(cyber_name))
            .collect())
    }

    fn list_dir(dir: &Path) -> Result<Vec<Task>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.path().extension().is_some_and(|e| e == "json") {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            if let Ok(task) = serde_json::from_str(&contents) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Claim `task_id` for `cyber_name`. Spec invariant: one active claim
    /// per cyber, enforced here before attempting the move; the move
    /// itself is what decides a claim race between two different cybers
    /// (spec scenario S2).
    pub fn claim(&self, task_id: &str, cyber_name: &str) -> Result<Task> {
        if !self.list_claimed_by(cyber_name)?.is_empty() {
            bail!("cyber {cyber_name} already holds an active claim");
        }

        std::fs::create_dir_all(&self.claimed_dir)?;
        let open_path = self.open_dir.join(Self::file_name(task_id));
        let claimed_path = self.claimed_dir.join(Self::file_name(task_id));

        fsutil::atomic_rename(&open_path, &claimed_path)
            .with_context(|| format!("task {task_id} is not available in open/ (already claimed or nonexistent)"))?;

        let contents = std::fs::read_to_string(&claimed_path)?;
        let mut task: Task = serde_json::from_str(&contents)?;
        task.claimed_by = Some(cyber_name.to_string());
        task.claimed_at = Some(Utc::now());
        task.updated = Utc::now();
        let json = serde_json::to_vec_pretty(&task)?;
        fsutil::atomic_write(&claimed_path, &json)?;
        Ok(task)
    }

    /// Update a claimed task in place (spec §4.8 "create/update/complete
    /// task"). Unlike `claim`/`complete`, this never moves the file between
    /// directories — the task stays claimed until `complete` runs.
    pub fn update(&self, task_id: &str, summary: Option<String>, todo: Option<Vec<TodoItem>>) -> Result<Task> {
        if let Some(todo) = &todo {
            if todo.len() > 10 {
                bail!("task {task_id} already has the maximum of 10 todo items");
            }
        }

        let claimed_path = self.claimed_dir.join(Self::file_name(task_id));
        let contents = std::fs::read_to_string(&claimed_path)
            .with_context(|| format!("task {task_id} is not in claimed/"))?;
        let mut task: Task = serde_json::from_str(&contents)?;

        if let Some(summary) = summary {
            task.summary = summary;
        }
        if let Some(todo) = todo {
            task.todo = todo;
        }
        task.updated = Utc::now();

        let json = serde_json::to_vec_pretty(&task)?;
        fsutil::atomic_write(&claimed_path, &json)?;
        Ok(task)
    }

    pub fn complete(&self, task_id: &str) -> Result<Task> {
        std::fs::create_dir_all(&self.completed_dir)?;
        let claimed_path = self.claimed_dir.join(Self::file_name(task_id));
        let completed_path = self.completed_dir.join(Self::file_name(task_id));

        let contents = std::fs::read_to_string(&claimed_path)
            .with_context(|| format!("task {task_id} is not in claimed/"))?;
        let mut task: Task = serde_json::from_str(&contents)?;
        task.completed = Some(Utc::now());
        task.updated = Utc::now();
        let json = serde_json::to_vec_pretty(&task)?;
        fsutil::atomic_write(&claimed_path, &json)?;

        fsutil::atomic_rename(&claimed_path, &completed_path)?;
        Ok(task)
    }
}
