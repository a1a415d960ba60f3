//! Read-only status snapshot

use crate::paths::{TeamPaths, CONFIG_FILE, SHUTDOWN_FILE, WATCHDOG_FAILED_FILE, WORKERS_FILE};
use crate::runtime::{ActiveWorker, TeamConfig, TeamRuntime, WorkerTable};
use crate::signals::{self, WatchdogFailure};
use crate::store::{TaskCounts, TaskStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use team_foundation::{Result, RuntimeSettings};

/// Overall team phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPhase {
    Running,
    Completed,
    CompletedWithFailures,
    WatchdogFailed,
    ShuttingDown,
}

impl TeamPhase {
    pub fn derive(counts: &TaskCounts, watchdog_failed: bool, shutting_down: bool) -> Self {
        if shutting_down {
            TeamPhase::ShuttingDown
        } else if watchdog_failed {
            TeamPhase::WatchdogFailed
        } else if counts.all_terminal() {
            if counts.failed > 0 {
                TeamPhase::CompletedWithFailures
            } else {
                TeamPhase::Completed
            }
        } else {
            TeamPhase::Running
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, TeamPhase::Running | TeamPhase::ShuttingDown)
    }
}

/// Derived view of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub worker_name: String,
    pub alive: bool,
    pub pane_id: String,
    pub current_task_id: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub stalled: bool,
}

/// Snapshot for external pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStatus {
    pub team_name: String,
    pub session_name: String,
    pub phase: TeamPhase,
    pub task_counts: TaskCounts,
    pub workers: Vec<WorkerStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog_failure: Option<WatchdogFailure>,
}

fn worker_status(
    paths: &TeamPaths,
    worker_name: &str,
    worker: &ActiveWorker,
    alive: bool,
    stall_threshold: Duration,
) -> WorkerStatus {
    let last_beat = signals::read_heartbeat(&paths.worker(worker_name)).map(|hb| hb.updated_at);
    let age = Utc::now()
        .signed_duration_since(last_beat.unwrap_or(worker.spawned_at))
        .to_std()
        .unwrap_or_default();

    WorkerStatus {
        worker_name: worker_name.to_string(),
        alive,
        pane_id: worker.pane_id.clone(),
        current_task_id: Some(worker.task_id.clone()),
        last_heartbeat: last_beat,
        stalled: alive && age > stall_threshold,
    }
}

impl TeamRuntime {
    /// Current status, with live pane checks
    pub async fn status(&self) -> Result<TeamStatus> {
        let counts = self.store.counts()?;
        let failure = self.watchdog_failure()?;
        let active = self.active_workers();

        let alive = join_all(active.values().map(|w| self.panes.is_alive(&w.pane_id))).await;
        let workers = active
            .iter()
            .zip(alive)
            .map(|((name, worker), alive)| {
                worker_status(&self.paths, name, worker, alive, self.settings.stall_threshold())
            })
            .collect();

        Ok(TeamStatus {
            team_name: self.team_name().to_string(),
            session_name: self.session_name().to_string(),
            phase: TeamPhase::derive(&counts, failure.is_some(), self.is_shutting_down()),
            task_counts: counts,
            workers,
            watchdog_failure: failure,
        })
    }
}

/// Status from disk only, for pollers in another process. Pane liveness is
/// unknown there and reported as `alive: false`. `Ok(None)` if no such team.
pub fn read_team_status(cwd: &Path, team_name: &str, settings: &RuntimeSettings) -> Result<Option<TeamStatus>> {
    let paths = TeamPaths::new(cwd, team_name);
    let team = paths.team();
    let Some(config) = team.load_optional::<TeamConfig>(CONFIG_FILE)? else {
        return Ok(None);
    };

    let store = TaskStore::new(&paths, team_name, settings);
    let counts = store.counts()?;
    let failure: Option<WatchdogFailure> = team.load_optional(WATCHDOG_FAILED_FILE)?;
    let table: WorkerTable = team.load_optional(WORKERS_FILE)?.unwrap_or_default();

    let workers = table
        .iter()
        .map(|(name, worker)| worker_status(&paths, name, worker, false, settings.stall_threshold()))
        .collect();

    Ok(Some(TeamStatus {
        team_name: config.team_name,
        session_name: config.session_name,
        phase: TeamPhase::derive(&counts, failure.is_some(), team.exists(SHUTDOWN_FILE)),
        task_counts: counts,
        workers,
        watchdog_failure: failure,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: usize, in_progress: usize, completed: usize, failed: usize) -> TaskCounts {
        TaskCounts {
            pending,
            in_progress,
            completed,
            failed,
        }
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(TeamPhase::derive(&counts(1, 1, 0, 0), false, false), TeamPhase::Running);
        assert_eq!(TeamPhase::derive(&counts(0, 0, 3, 0), false, false), TeamPhase::Completed);
        assert_eq!(
            TeamPhase::derive(&counts(0, 0, 2, 1), false, false),
            TeamPhase::CompletedWithFailures
        );
        assert_eq!(TeamPhase::derive(&counts(0, 0, 3, 0), true, false), TeamPhase::WatchdogFailed);
        assert_eq!(TeamPhase::derive(&counts(2, 0, 0, 0), true, true), TeamPhase::ShuttingDown);
    }

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(
            serde_json::to_string(&TeamPhase::CompletedWithFailures).unwrap(),
            "\"completed_with_failures\""
        );
        assert!(TeamPhase::Completed.is_finished());
        assert!(!TeamPhase::Running.is_finished());
    }

    #[test]
    fn test_read_status_of_missing_team() {
        let dir = tempfile::tempdir().unwrap();
        let status = read_team_status(dir.path(), "none", &RuntimeSettings::for_tests()).unwrap();
        assert!(status.is_none());
    }
}
