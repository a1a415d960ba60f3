//! Spawn protocol
//!
//! claim -> split -> inbox -> launch -> deliver -> record. Any failure after
//! the claim kills the new pane and rolls the task back to pending, so a task
//! is never left in_progress without a live worker.

use crate::agent::{agent_for_worker, AgentKind, Delivery};
use crate::bootstrap;
use crate::paths::{worker_index, worker_name};
use crate::runtime::{ActiveWorker, TeamRuntime};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use team_foundation::{Error, Result, RuntimeSettings};
use team_pane::PaneManager;
use tracing::{debug, info, warn};

pub const ENV_TEAM_NAME: &str = "OMC_TEAM_NAME";
pub const ENV_WORKER: &str = "OMC_TEAM_WORKER";
pub const ENV_AGENT_TYPE: &str = "OMC_TEAM_AGENT_TYPE";
pub const ENV_TASK_ID: &str = "OMC_TEAM_TASK_ID";
pub const ENV_STATE_DIR: &str = "OMC_TEAM_STATE_DIR";

/// Type `text` into a pane, retrying with a fixed backoff
pub(crate) async fn send_with_retry(
    panes: &dyn PaneManager,
    settings: &RuntimeSettings,
    session_name: &str,
    pane_id: &str,
    text: &str,
) -> bool {
    let attempts = settings.send_retry_attempts.max(1);
    for attempt in 1..=attempts {
        if panes.send_text(session_name, pane_id, text).await {
            return true;
        }
        debug!(pane_id = %pane_id, attempt, attempts, "send_text failed");
        if attempt < attempts {
            tokio::time::sleep(settings.send_retry_backoff()).await;
        }
    }
    false
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

impl TeamRuntime {
    /// Spawn a worker on the next pending task.
    /// `Ok(None)` when no task is pending (or every claim was lost).
    pub async fn spawn_next(&self) -> Result<Option<String>> {
        for _ in 0..=self.config.tasks.len() {
            let Some(task) = self.store.find_next_pending()? else {
                return Ok(None);
            };
            let name = worker_name(self.spawned_count.load(Ordering::Acquire) + 1);
            if self.spawn_worker(&name, &task.id).await?.is_some() {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Spawn `worker_name` on `task_id`. Returns the new pane id, or `None`
    /// if the claim was lost; no pane is created for an unowned task.
    /// A name that is already active (or being spawned) is rejected.
    pub async fn spawn_worker(&self, worker_name: &str, task_id: &str) -> Result<Option<String>> {
        {
            let mut reg = self.workers.write();
            if reg.active.contains_key(worker_name) || !reg.spawning.insert(worker_name.to_string()) {
                return Err(Error::InvalidInput(format!("Worker {} is already active", worker_name)));
            }
        }
        let spawned = self.spawn_reserved(worker_name, task_id).await;
        self.workers.write().spawning.remove(worker_name);
        spawned
    }

    async fn spawn_reserved(&self, worker_name: &str, task_id: &str) -> Result<Option<String>> {
        let index = worker_index(worker_name)
            .unwrap_or_else(|| self.spawned_count.load(Ordering::Acquire) + 1);
        let agent = agent_for_worker(&self.config.agent_types, index)
            .cloned()
            .ok_or_else(|| Error::Internal("team has no agent types".into()))?;

        let Some(task) = self.store.claim(task_id, worker_name).await? else {
            return Ok(None);
        };

        let target = self.split_target();
        let pane_id = match self.panes.split_pane(&target, &self.cwd).await {
            Ok(pane_id) => pane_id,
            Err(e) => {
                self.abort_spawn(worker_name, task_id, None).await;
                return Err(Error::launch_failed(worker_name, e.to_string()));
            }
        };
        if let Err(e) = self.panes.normalize_layout(self.session_name()).await {
            debug!(team = %self.team_name(), "Layout normalization failed: {}", e);
        }

        if let Err(e) = bootstrap::write_inbox(&self.paths, self.team_name(), worker_name, &task) {
            self.abort_spawn(worker_name, task_id, Some(&pane_id)).await;
            return Err(e);
        }

        let instruction = bootstrap::initial_instruction(&self.paths.inbox(worker_name));
        let launch = agent
            .launch_spec(&self.settings, &self.cwd, &instruction)
            .env(ENV_TEAM_NAME, self.team_name())
            .env(ENV_WORKER, worker_name)
            .env(ENV_AGENT_TYPE, agent.as_str())
            .env(ENV_TASK_ID, task_id)
            .env(ENV_STATE_DIR, self.paths.root().display().to_string());
        if let Err(e) = self.panes.launch(&pane_id, &launch).await {
            self.abort_spawn(worker_name, task_id, Some(&pane_id)).await;
            return Err(Error::launch_failed(worker_name, e.to_string()));
        }

        if agent.delivery() == Delivery::Interactive
            && !self.deliver_interactive(&agent, &pane_id, &instruction).await
        {
            self.abort_spawn(worker_name, task_id, Some(&pane_id)).await;
            return Err(Error::notify_failed(worker_name, "initial-inbox"));
        }

        self.spawned_count.fetch_max(index, Ordering::AcqRel);
        self.record_worker(
            worker_name,
            ActiveWorker {
                pane_id: pane_id.clone(),
                task_id: task_id.to_string(),
                agent_type: agent.clone(),
                spawned_at: Utc::now(),
            },
        );
        self.persist_topology();

        info!(
            team = %self.team_name(),
            worker = %worker_name,
            task_id = %task_id,
            pane_id = %pane_id,
            agent = %agent,
            "Worker spawned"
        );
        Ok(Some(pane_id))
    }

    /// Warm-up, optional trust confirmation, then retried keystroke delivery
    async fn deliver_interactive(&self, agent: &AgentKind, pane_id: &str, text: &str) -> bool {
        pause(self.settings.interactive_warmup()).await;

        if let Some(key) = agent.trust_key() {
            if !self.panes.send_key(pane_id, key).await {
                debug!(pane_id = %pane_id, "Trust confirmation key not delivered");
            }
            pause(self.settings.trust_confirm_delay()).await;
        }

        send_with_retry(
            self.panes.as_ref(),
            &self.settings,
            self.session_name(),
            pane_id,
            text,
        )
        .await
    }

    async fn abort_spawn(&self, worker_name: &str, task_id: &str, pane_id: Option<&str>) {
        if let Some(pane_id) = pane_id {
            if let Err(e) = self.panes.kill_pane(pane_id).await {
                warn!(worker = %worker_name, pane_id = %pane_id, "Failed to kill pane: {}", e);
            }
        }
        match self.store.release(task_id, worker_name).await {
            Ok(true) => debug!(worker = %worker_name, task_id = %task_id, "Claim rolled back"),
            Ok(false) => warn!(worker = %worker_name, task_id = %task_id, "Claim changed before rollback"),
            Err(e) => warn!(worker = %worker_name, task_id = %task_id, "Failed to roll back claim: {}", e),
        }
    }
}
