//! Task store
//!
//! One JSON file per task. Reads are lock-free; every status change is a
//! read-modify-write performed while holding that task's file lock, and the
//! task is always re-read inside the lock. Contention is reported as a value
//! ([`Transition::Busy`], `Ok(None)`), never as an error.

use crate::paths::TeamPaths;
use crate::state::TaskStatus;
use crate::task::{compare_ids, TaskSnapshot, TaskSpec, TeamTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use team_foundation::{Error, FileLock, JsonStore, Result, RuntimeSettings};
use tracing::{debug, warn};

/// Number of tasks in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TeamTask>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }

    /// Every task is completed or failed
    pub fn all_terminal(&self) -> bool {
        self.total() > 0 && self.pending == 0 && self.in_progress == 0
    }
}

/// Result of a locked read-modify-write
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Mutation written; carries the new task
    Applied(TeamTask),

    /// Current state did not allow the mutation; carries the unchanged task
    Rejected(TeamTask),

    /// Lock not acquired within the timeout
    Busy,
}

impl Transition {
    pub fn applied(self) -> Option<TeamTask> {
        match self {
            Transition::Applied(task) => Some(task),
            _ => None,
        }
    }
}

/// Task files of one team
#[derive(Debug, Clone)]
pub struct TaskStore {
    team_name: String,
    paths: TeamPaths,
    tasks: JsonStore,
    lock_timeout: Duration,
    lock_poll: Duration,
}

impl TaskStore {
    pub fn new(paths: &TeamPaths, team_name: &str, settings: &RuntimeSettings) -> Self {
        Self {
            team_name: team_name.to_string(),
            paths: paths.clone(),
            tasks: paths.tasks(),
            lock_timeout: settings.lock_timeout(),
            lock_poll: settings.lock_poll(),
        }
    }

    pub fn team_name(&self) -> &str {
        &self.team_name
    }

    /// Write one pending task per spec, with ids "1".."n"
    pub fn create_tasks(&self, specs: &[TaskSpec]) -> Result<Vec<TeamTask>> {
        self.tasks.ensure_dir()?;
        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let task = TeamTask::new((i + 1).to_string(), spec);
                self.write(&task)?;
                Ok(task)
            })
            .collect()
    }

    /// Lock-free read
    pub fn read(&self, task_id: &str) -> Result<Option<TeamTask>> {
        self.tasks.load_optional(&TeamPaths::task_file_name(task_id))
    }

    /// Unconditional write. Status changes must go through [`Self::update`].
    pub fn write(&self, task: &TeamTask) -> Result<()> {
        self.tasks.save(&TeamPaths::task_file_name(&task.id), task)
    }

    fn task_file_names(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(self.tasks.base_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') && name.ends_with(".json") {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// All tasks, ordered by id
    pub fn list(&self) -> Result<Vec<TeamTask>> {
        let mut tasks = self
            .task_file_names()?
            .iter()
            .map(|name| self.tasks.load::<TeamTask>(name))
            .collect::<Result<Vec<_>>>()?;
        tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
        Ok(tasks)
    }

    /// Like [`list`](Self::list), but unreadable task files are skipped with a warning
    pub fn list_readable(&self) -> Result<Vec<TeamTask>> {
        let mut tasks = Vec::new();
        for name in self.task_file_names()? {
            match self.tasks.load::<TeamTask>(&name) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(team = %self.team_name, file = %name, "Skipping unreadable task: {}", e),
            }
        }
        tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
        Ok(tasks)
    }

    /// Run `f` holding the exclusive lock of `(team, task_id)`.
    /// Returns `Ok(None)` if the lock was not acquired in time.
    pub async fn with_lock<T, F>(&self, task_id: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let lock = FileLock::new(self.paths.task_lock(task_id))
            .with_timeout(self.lock_timeout)
            .with_poll_interval(self.lock_poll);

        let Some(_guard) = lock.acquire().await? else {
            debug!(team = %self.team_name, task_id = %task_id, "Task lock not acquired");
            return Ok(None);
        };
        f(self).map(Some)
    }

    /// Locked read-modify-write. `mutate` returns whether it changed the task.
    pub async fn update<F>(&self, task_id: &str, mutate: F) -> Result<Transition>
    where
        F: FnOnce(&mut TeamTask) -> bool,
    {
        let outcome = self
            .with_lock(task_id, |store| {
                let mut task = store
                    .read(task_id)?
                    .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
                if mutate(&mut task) {
                    store.write(&task)?;
                    Ok(Transition::Applied(task))
                } else {
                    Ok(Transition::Rejected(task))
                }
            })
            .await?;
        Ok(outcome.unwrap_or(Transition::Busy))
    }

    /// Compare-and-swap pending -> in_progress. `None` means another claimer
    /// won, the task is no longer pending, or the lock was busy.
    pub async fn claim(&self, task_id: &str, owner: &str) -> Result<Option<TeamTask>> {
        let now = Utc::now();
        let claimed = self
            .update(task_id, |task| task.claim(owner, now))
            .await?
            .applied();
        if claimed.is_none() {
            debug!(team = %self.team_name, task_id = %task_id, worker = %owner, "Claim lost");
        }
        Ok(claimed)
    }

    /// Move an in-progress task to a terminal status
    pub async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &str,
        result: Option<String>,
    ) -> Result<Transition> {
        self.finish_at(task_id, status, summary, result, Utc::now()).await
    }

    /// [`finish`](Self::finish) with an explicit terminal timestamp
    pub async fn finish_at(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &str,
        result: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        self.update(task_id, |task| task.finish(status, summary, result, at))
            .await
    }

    /// Roll a claim by `owner` back to pending
    pub async fn release(&self, task_id: &str, owner: &str) -> Result<bool> {
        match self.update(task_id, |task| task.release(owner)).await? {
            Transition::Applied(_) => Ok(true),
            Transition::Rejected(_) => Ok(false),
            Transition::Busy => Err(self.lock_error(task_id)),
        }
    }

    /// Put back the exact fields captured before a failed assignment to
    /// `owner`. Nothing is restored once the task has left that assignment
    /// (finished, or taken by someone else); returns whether it was restored.
    pub async fn restore(&self, task_id: &str, snapshot: &TaskSnapshot, owner: &str) -> Result<bool> {
        let transition = self
            .update(task_id, |task| {
                if !task.status.is_in_progress() || task.owner.as_deref() != Some(owner) {
                    return false;
                }
                task.restore(snapshot);
                true
            })
            .await?;
        match transition {
            Transition::Applied(_) => Ok(true),
            Transition::Rejected(_) => Ok(false),
            Transition::Busy => Err(self.lock_error(task_id)),
        }
    }

    /// First pending task by id
    pub fn find_next_pending(&self) -> Result<Option<TeamTask>> {
        Ok(self.list()?.into_iter().find(|t| t.status.is_pending()))
    }

    pub fn counts(&self) -> Result<TaskCounts> {
        Ok(TaskCounts::from_tasks(&self.list()?))
    }

    pub fn lock_error(&self, task_id: &str) -> Error {
        Error::LockNotAcquired {
            scope: format!("{}/{}", self.team_name, task_id),
        }
    }
}
