//! Shutdown protocol
//!
//! 1. write `shutdown.json`
//! 2. poll for `shutdown-ack.json` from ack-protocol workers (skipped when
//!    every agent type is a built-in CLI)
//! 3. kill the session, whatever the acks said
//! 4. remove the team directory (best-effort)

use crate::agent::AgentKind;
use crate::paths::{TeamPaths, CONFIG_FILE, SHUTDOWN_FILE, WORKERS_FILE};
use crate::runtime::{TeamConfig, TeamRuntime, WorkerTable};
use crate::signals::ShutdownRequest;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use team_foundation::{Result, RuntimeSettings};
use team_pane::PaneManager;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What shutdown did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
    /// Every agent type is a built-in CLI, so no acks were awaited
    pub ack_polling_skipped: bool,
    pub acks_expected: usize,
    pub acks_received: usize,
    /// Gave up waiting for acks
    pub timed_out: bool,
    pub session_killed: bool,
    pub state_removed: bool,
}

struct Teardown<'a> {
    panes: &'a dyn PaneManager,
    settings: &'a RuntimeSettings,
    paths: &'a TeamPaths,
    config: &'a TeamConfig,
    workers: WorkerTable,
    worker_pane_ids: Vec<String>,
}

impl Teardown<'_> {
    async fn run(self, timeout: Duration, reason: Option<String>) -> ShutdownReport {
        let team = self.config.team_name.as_str();
        let mut report = ShutdownReport::default();

        let request = ShutdownRequest {
            requested_at: Utc::now(),
            reason,
        };
        if let Err(e) = self.paths.team().save(SHUTDOWN_FILE, &request) {
            warn!(team = %team, "Failed to write shutdown request: {}", e);
        }

        report.ack_polling_skipped = !expects_acks(&self.config.agent_types);
        if !report.ack_polling_skipped {
            let expected: Vec<&String> = self
                .workers
                .iter()
                .filter(|(_, w)| w.agent_type.writes_shutdown_ack())
                .map(|(name, _)| name)
                .collect();
            report.acks_expected = expected.len();
            let (received, timed_out) = self.await_acks(&expected, timeout).await;
            report.acks_received = received;
            report.timed_out = timed_out;
        }

        match self
            .panes
            .kill_session(
                &self.config.session_name,
                &self.worker_pane_ids,
                &self.config.leader_pane_id,
            )
            .await
        {
            Ok(()) => report.session_killed = true,
            Err(e) => warn!(team = %team, session = %self.config.session_name, "Failed to kill session: {}", e),
        }

        match self.paths.team().remove_all() {
            Ok(()) => report.state_removed = true,
            Err(e) => warn!(team = %team, "Failed to remove team state: {}", e),
        }

        info!(
            team = %team,
            acks = report.acks_received,
            expected = report.acks_expected,
            skipped = report.ack_polling_skipped,
            "Team shut down"
        );
        report
    }

    /// Returns (acks received, timed out)
    async fn await_acks(&self, expected: &[&String], timeout: Duration) -> (usize, bool) {
        let deadline = Instant::now() + timeout;
        loop {
            let received = expected
                .iter()
                .filter(|name| self.paths.shutdown_ack(name).exists())
                .count();
            if received == expected.len() {
                return (received, false);
            }
            if Instant::now() >= deadline {
                debug!(received, expected = expected.len(), "Shutdown ack wait timed out");
                return (received, true);
            }
            tokio::time::sleep(self.settings.shutdown_poll()).await;
        }
    }
}

impl TeamRuntime {
    /// Stop supervising and tear the team down. `timeout` bounds ack polling
    /// (default: `shutdownTimeoutMs`).
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<ShutdownReport> {
        self.shutting_down.store(true, Ordering::Release);
        self.stopped.store(true, Ordering::Release);

        let (workers, worker_pane_ids) = {
            let reg = self.workers.read();
            (reg.active.clone(), reg.worker_pane_ids.clone())
        };

        let report = Teardown {
            panes: self.panes.as_ref(),
            settings: &self.settings,
            paths: &self.paths,
            config: &self.config,
            workers,
            worker_pane_ids,
        }
        .run(timeout.unwrap_or_else(|| self.settings.shutdown_timeout()), None)
        .await;

        {
            let mut reg = self.workers.write();
            reg.active.clear();
            reg.worker_pane_ids.clear();
            reg.unresponsive.clear();
        }
        Ok(report)
    }
}

/// Shut down a team from its on-disk state (no live runtime needed).
/// `Ok(None)` if no such team exists.
pub async fn shutdown_team(
    cwd: &Path,
    team_name: &str,
    panes: &dyn PaneManager,
    settings: &RuntimeSettings,
    timeout: Option<Duration>,
    reason: Option<String>,
) -> Result<Option<ShutdownReport>> {
    let paths = TeamPaths::new(cwd, team_name);
    let Some(config) = paths.team().load_optional::<TeamConfig>(CONFIG_FILE)? else {
        return Ok(None);
    };
    let workers: WorkerTable = paths
        .team()
        .load_optional(WORKERS_FILE)
        .unwrap_or_else(|e| {
            warn!(team = %team_name, "Unreadable worker table: {}", e);
            None
        })
        .unwrap_or_default();
    let worker_pane_ids = workers.values().map(|w| w.pane_id.clone()).collect();

    let report = Teardown {
        panes,
        settings,
        paths: &paths,
        config: &config,
        workers,
        worker_pane_ids,
    }
    .run(timeout.unwrap_or_else(|| settings.shutdown_timeout()), reason)
    .await;
    Ok(Some(report))
}

/// Whether shutdown would poll for acks with these agent types
pub fn expects_acks(agent_types: &[AgentKind]) -> bool {
    agent_types.iter().any(AgentKind::writes_shutdown_ack)
}
