//! Watchdog - periodic reconciliation of workers against task state
//!
//! Per active worker, in priority order:
//! 1. done signal present -> apply it to the named task if the worker owns
//!    it; retire the worker once it owns nothing else
//! 2. pane dead -> every task it owns failed, retire the worker
//! 3. heartbeat stale -> count; at the kill threshold handle as (2)
//! 4. heartbeat fresh -> reset the count
//!
//! Ownership comes from the task files, so tasks assigned to a running
//! worker are covered too. In-progress tasks whose owner is gone are failed.
//! Freed slots are refilled from pending tasks. Repeated tick errors persist
//! `watchdog-failed.json` and stop the loop for good.

use crate::paths::{DONE_FILE, WATCHDOG_FAILED_FILE};
use crate::resume::WORKER_LOST_SUMMARY;
use crate::runtime::{ActiveWorker, TeamRuntime};
use crate::signals::{self, DoneRead, WatchdogFailure};
use crate::state::TaskStatus;
use crate::store::Transition;
use crate::task::TeamTask;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use team_foundation::{Error, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const PANE_DIED_SUMMARY: &str = "worker pane died before writing a done signal";

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Another tick was still running
    pub skipped: bool,

    /// No active workers and nothing to refill
    pub idle: bool,

    /// Task ids completed this tick
    pub completed: Vec<String>,

    /// Task ids failed this tick
    pub failed: Vec<String>,

    /// Workers with a stale heartbeat still below the kill threshold
    pub stalled: Vec<String>,

    /// Replacement workers spawned
    pub spawned: Vec<String>,

    /// Every task is terminal
    pub team_done: bool,
}

struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Observation {
    worker_name: String,
    worker: ActiveWorker,
    /// In-progress tasks this worker owns on disk
    owned: Vec<String>,
    has_done: bool,
    alive: bool,
}

/// What reconciliation did to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Kept,
    /// Finished one task and moved on to another it owns
    Advanced,
    Retired,
}

/// Terminal status to write for one task
struct Verdict {
    task_id: String,
    status: TaskStatus,
    summary: String,
    result: Option<String>,
    at: DateTime<Utc>,
}

impl TeamRuntime {
    /// Run one reconciliation pass. Overlapping calls return a skipped report.
    pub async fn tick(&self) -> Result<TickReport> {
        if self
            .tick_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(TickReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _guard = TickGuard(&self.tick_running);
        self.tick_inner().await
    }

    async fn tick_inner(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let active: Vec<(String, ActiveWorker)> = self
            .workers
            .read()
            .active
            .iter()
            .map(|(name, worker)| (name.clone(), worker.clone()))
            .collect();

        if active.is_empty() && !self.refill_needed.load(Ordering::Acquire) {
            report.idle = true;
            return Ok(report);
        }

        let tasks = self.store.list_readable()?;
        let mut owned: HashMap<&str, Vec<String>> = HashMap::new();
        for task in tasks.iter().filter(|t| t.status.is_in_progress()) {
            if let Some(owner) = task.owner.as_deref() {
                owned.entry(owner).or_default().push(task.id.clone());
            }
        }

        let observations = join_all(active.into_iter().map(|(worker_name, worker)| {
            let owned = owned.get(worker_name.as_str()).cloned().unwrap_or_default();
            async move {
                let done_path = self.paths.done(&worker_name);
                let (has_done, alive) = tokio::join!(
                    tokio::fs::try_exists(&done_path),
                    self.panes.is_alive(&worker.pane_id)
                );
                Observation {
                    has_done: has_done.unwrap_or(false),
                    alive,
                    owned,
                    worker_name,
                    worker,
                }
            }
        }))
        .await;

        // 한 worker 의 실패가 나머지 worker 처리를 막지 않도록 에러는 모아서 반환
        let mut changed = 0usize;
        let mut first_error: Option<Error> = None;
        for observation in observations {
            let worker_name = observation.worker_name.clone();
            match self.reconcile(observation, &mut report).await {
                Ok(Outcome::Kept) => {}
                Ok(_) => changed += 1,
                Err(e) => {
                    warn!(team = %self.team_name(), worker = %worker_name, "Reconcile failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if changed > 0 {
            self.persist_topology();
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.fail_orphans(&tasks, &mut report).await?;
        self.refill(&mut report).await?;
        report.team_done = self.store.counts()?.all_terminal();

        debug!(
            team = %self.team_name(),
            completed = report.completed.len(),
            failed = report.failed.len(),
            spawned = report.spawned.len(),
            "Watchdog tick"
        );
        Ok(report)
    }

    /// Handle one worker
    async fn reconcile(&self, obs: Observation, report: &mut TickReport) -> Result<Outcome> {
        let Observation {
            worker_name,
            worker,
            owned,
            has_done,
            alive,
        } = obs;

        if has_done {
            match signals::read_done(&self.paths.worker(&worker_name))? {
                DoneRead::Signal(signal) => {
                    let task_id = if owned.contains(&signal.task_id) {
                        signal.task_id.clone()
                    } else {
                        if signal.task_id != worker.task_id {
                            warn!(
                                worker = %worker_name,
                                task_id = %worker.task_id,
                                signalled = %signal.task_id,
                                "Done signal names a task this worker does not own; applying to its current task"
                            );
                        }
                        worker.task_id.clone()
                    };
                    let status = TaskStatus::from(signal.status);
                    let summary = if signal.summary.trim().is_empty() {
                        format!("worker reported {}", status.as_str())
                    } else {
                        signal.summary.clone()
                    };
                    let verdict = Verdict {
                        task_id,
                        status,
                        summary,
                        result: signal.result,
                        at: signal.completed_at.unwrap_or_else(Utc::now),
                    };
                    return self.complete(&worker_name, &worker, &owned, verdict, report).await;
                }
                DoneRead::Malformed(err) => {
                    let verdict = Verdict {
                        task_id: worker.task_id.clone(),
                        status: TaskStatus::Failed,
                        summary: format!("malformed done signal: {}", err),
                        result: None,
                        at: Utc::now(),
                    };
                    return self.complete(&worker_name, &worker, &owned, verdict, report).await;
                }
                DoneRead::Absent => {}
            }
        }

        if !alive {
            return self
                .fail_worker(&worker_name, &worker, &owned, PANE_DIED_SUMMARY, report)
                .await;
        }

        let last_beat = signals::read_heartbeat(&self.paths.worker(&worker_name))
            .map(|hb| hb.updated_at)
            .unwrap_or(worker.spawned_at);
        let age = Utc::now()
            .signed_duration_since(last_beat)
            .to_std()
            .unwrap_or_default();

        if age <= self.settings.stall_threshold() {
            self.workers.write().unresponsive.remove(&worker_name);
            return Ok(Outcome::Kept);
        }

        let stalled = {
            let mut reg = self.workers.write();
            let count = reg.unresponsive.entry(worker_name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if stalled >= self.settings.unresponsive_kill_threshold {
            let summary = format!(
                "worker unresponsive: no heartbeat for {}s ({} consecutive stalled checks)",
                age.as_secs(),
                stalled
            );
            return self
                .fail_worker(&worker_name, &worker, &owned, &summary, report)
                .await;
        }

        warn!(
            team = %self.team_name(),
            worker = %worker_name,
            task_id = %worker.task_id,
            stalled,
            threshold = self.settings.unresponsive_kill_threshold,
            "Worker heartbeat is stale"
        );
        report.stalled.push(worker_name);
        Ok(Outcome::Kept)
    }

    /// Apply a done signal. The worker moves on to the next task it owns, or
    /// is retired when it has none left.
    async fn complete(
        &self,
        worker_name: &str,
        worker: &ActiveWorker,
        owned: &[String],
        verdict: Verdict,
        report: &mut TickReport,
    ) -> Result<Outcome> {
        if !self.apply(worker_name, &verdict, report).await? {
            return Ok(Outcome::Kept);
        }
        self.discard_done(worker_name);

        let Some(next) = owned.iter().find(|id| **id != verdict.task_id) else {
            self.retire(worker_name, worker).await;
            return Ok(Outcome::Retired);
        };

        {
            let mut reg = self.workers.write();
            reg.unresponsive.remove(worker_name);
            if let Some(active) = reg.active.get_mut(worker_name) {
                active.task_id = next.clone();
            }
        }
        info!(
            team = %self.team_name(),
            worker = %worker_name,
            task_id = %next,
            "Worker moved on to its next assigned task"
        );
        Ok(Outcome::Advanced)
    }

    /// Fail every task the worker holds, then retire it
    async fn fail_worker(
        &self,
        worker_name: &str,
        worker: &ActiveWorker,
        owned: &[String],
        summary: &str,
        report: &mut TickReport,
    ) -> Result<Outcome> {
        let mut targets: Vec<&String> = owned.iter().collect();
        if !targets.contains(&&worker.task_id) {
            targets.push(&worker.task_id);
        }

        let now = Utc::now();
        let mut settled = true;
        for task_id in targets {
            let verdict = Verdict {
                task_id: task_id.clone(),
                status: TaskStatus::Failed,
                summary: summary.to_string(),
                result: None,
                at: now,
            };
            settled &= self.apply(worker_name, &verdict, report).await?;
        }
        if !settled {
            return Ok(Outcome::Kept);
        }

        self.discard_done(worker_name);
        self.retire(worker_name, worker).await;
        Ok(Outcome::Retired)
    }

    /// Write a terminal status. `Ok(false)` if the task lock was busy.
    async fn apply(&self, worker_name: &str, verdict: &Verdict, report: &mut TickReport) -> Result<bool> {
        let transition = self
            .store
            .finish_at(
                &verdict.task_id,
                verdict.status,
                &verdict.summary,
                verdict.result.clone(),
                verdict.at,
            )
            .await?;

        match transition {
            Transition::Busy => {
                debug!(worker = %worker_name, task_id = %verdict.task_id, "Task lock busy; retrying next tick");
                return Ok(false);
            }
            Transition::Applied(task) => {
                if verdict.status == TaskStatus::Completed {
                    info!(team = %self.team_name(), worker = %worker_name, task_id = %task.id, "Task completed");
                    report.completed.push(task.id);
                } else {
                    info!(team = %self.team_name(), worker = %worker_name, task_id = %task.id, summary = %verdict.summary, "Task failed");
                    report.failed.push(task.id);
                }
            }
            Transition::Rejected(task) => {
                warn!(
                    worker = %worker_name,
                    task_id = %task.id,
                    status = %task.status.as_str(),
                    "Task no longer in progress; nothing to apply"
                );
            }
        }
        Ok(true)
    }

    fn discard_done(&self, worker_name: &str) {
        if let Err(e) = self.paths.worker(worker_name).remove(DONE_FILE) {
            warn!(worker = %worker_name, "Failed to delete done signal: {}", e);
        }
    }

    async fn retire(&self, worker_name: &str, worker: &ActiveWorker) {
        if let Err(e) = self.panes.kill_pane(&worker.pane_id).await {
            warn!(worker = %worker_name, pane_id = %worker.pane_id, "Failed to kill pane: {}", e);
        }
        self.remove_worker(worker_name);
    }

    /// Fail in-progress tasks whose owner is neither active nor being spawned
    async fn fail_orphans(&self, tasks: &[TeamTask], report: &mut TickReport) -> Result<()> {
        let orphans: Vec<&TeamTask> = {
            let reg = self.workers.read();
            tasks
                .iter()
                .filter(|t| t.status.is_in_progress())
                .filter(|t| match t.owner.as_deref() {
                    Some(owner) => !reg.active.contains_key(owner) && !reg.spawning.contains(owner),
                    None => true,
                })
                .collect()
        };

        for task in orphans {
            if let Transition::Applied(failed) = self
                .store
                .finish(&task.id, TaskStatus::Failed, WORKER_LOST_SUMMARY, None)
                .await?
            {
                warn!(
                    team = %self.team_name(),
                    task_id = %failed.id,
                    owner = ?task.owner,
                    "In-progress task has no live worker; failed"
                );
                report.failed.push(failed.id);
            }
        }
        Ok(())
    }

    /// Fill free slots from pending tasks
    async fn refill(&self, report: &mut TickReport) -> Result<()> {
        if self.is_stopped() || self.is_shutting_down() {
            return Ok(());
        }
        let free = self.config.concurrency.saturating_sub(self.active_count());
        for _ in 0..free {
            match self.spawn_next().await {
                Ok(Some(worker_name)) => report.spawned.push(worker_name),
                Ok(None) => break,
                Err(e) => {
                    self.refill_needed.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }
        self.refill_needed.store(false, Ordering::Release);
        Ok(())
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Run the watchdog on the current task until it stops
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move { runtime.run_watchdog().await })
    }

    /// Tick at the configured interval until the team is finished, the
    /// runtime is shut down, or the failure ceiling is reached.
    pub async fn run_watchdog(&self) {
        let mut interval = tokio::time::interval(self.settings.watchdog_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(team = %self.team_name(), "Watchdog started");

        loop {
            interval.tick().await;
            if self.is_stopped() {
                break;
            }

            match self.tick().await {
                Ok(report) => {
                    self.consecutive_failures.store(0, Ordering::Release);
                    if report.idle || (report.team_done && self.active_count() == 0) {
                        info!(team = %self.team_name(), "All tasks settled; watchdog exiting");
                        self.stopped.store(true, Ordering::Release);
                        break;
                    }
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        team = %self.team_name(),
                        failures,
                        ceiling = self.settings.watchdog_failure_ceiling,
                        "Watchdog tick failed: {}",
                        e
                    );
                    if failures >= self.settings.watchdog_failure_ceiling {
                        self.escalate(failures, &e);
                        break;
                    }
                }
            }
        }
    }

    fn escalate(&self, failures: u32, err: &Error) {
        self.stopped.store(true, Ordering::Release);
        error!(team = %self.team_name(), failures, "Watchdog stopped after repeated failures: {}", err);

        let marker = WatchdogFailure {
            failed_at: Utc::now(),
            consecutive_failures: failures,
            last_error: err.to_string(),
        };
        if let Err(e) = self.paths.team().save(WATCHDOG_FAILED_FILE, &marker) {
            error!(team = %self.team_name(), "Failed to persist watchdog failure marker: {}", e);
        }
    }

    /// Persisted fatal marker, if the watchdog gave up
    pub fn watchdog_failure(&self) -> Result<Option<WatchdogFailure>> {
        self.paths.team().load_optional(WATCHDOG_FAILED_FILE)
    }
}
