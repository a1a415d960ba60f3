//! Team Runtime - one value per supervised team
//!
//! Owns everything the supervisor knows about a team: the immutable config,
//! the task store, the pane manager handle and the in-memory worker registry.
//! A process supervising several teams holds one runtime per team; nothing is
//! shared between them.

use crate::agent::AgentKind;
use crate::paths::{validate_team_name, TeamPaths, CONFIG_FILE, WORKERS_FILE};
use crate::store::TaskStore;
use crate::task::TaskSpec;
use crate::tracking::{self, PaneTracking};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use team_foundation::{Error, Result, RuntimeSettings};
use team_pane::PaneManager;
use tracing::{debug, info, warn};

// ============================================================================
// Types
// ============================================================================

/// Team creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    pub team_name: String,
    pub agent_types: Vec<AgentKind>,
    pub tasks: Vec<TaskSpec>,

    /// Defaults to the number of agent types
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// `config.json` - snapshot of the team at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    pub team_name: String,
    pub session_name: String,
    pub leader_pane_id: String,
    pub agent_types: Vec<AgentKind>,
    pub tasks: Vec<TaskSpec>,
    pub concurrency: usize,
    pub created_at: DateTime<Utc>,
}

/// A worker currently owning a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWorker {
    pub pane_id: String,
    pub task_id: String,
    pub agent_type: AgentKind,
    pub spawned_at: DateTime<Utc>,
}

/// `workers.json` - worker name -> active worker
pub type WorkerTable = BTreeMap<String, ActiveWorker>;

#[derive(Debug, Default)]
pub(crate) struct WorkerRegistry {
    /// Every worker spawned by this runtime, in spawn order
    pub worker_names: Vec<String>,

    /// Live worker panes, in split order
    pub worker_pane_ids: Vec<String>,

    pub active: WorkerTable,

    /// Consecutive stalled ticks per worker
    pub unresponsive: HashMap<String, u32>,

    /// Names reserved by a spawn still in flight
    pub spawning: HashSet<String>,
}

/// Environment a runtime is built in
#[derive(Clone)]
pub struct RuntimeContext {
    pub cwd: PathBuf,
    pub panes: Arc<dyn PaneManager>,
    pub settings: RuntimeSettings,

    /// Pane tracking file; taken from the environment by default
    pub tracking_path: Option<PathBuf>,
}

impl RuntimeContext {
    pub fn new(cwd: impl Into<PathBuf>, panes: Arc<dyn PaneManager>, settings: RuntimeSettings) -> Self {
        Self {
            cwd: cwd.into(),
            panes,
            settings,
            tracking_path: tracking::tracking_path_from_env(),
        }
    }

    pub fn with_tracking_path(mut self, path: Option<PathBuf>) -> Self {
        self.tracking_path = path;
        self
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Supervisor state for one team
pub struct TeamRuntime {
    pub(crate) config: TeamConfig,
    pub(crate) cwd: PathBuf,
    pub(crate) paths: TeamPaths,
    pub(crate) store: TaskStore,
    pub(crate) panes: Arc<dyn PaneManager>,
    pub(crate) settings: RuntimeSettings,
    pub(crate) tracking_path: Option<PathBuf>,

    /// Never held across an await
    pub(crate) workers: RwLock<WorkerRegistry>,

    pub(crate) tick_running: AtomicBool,
    pub(crate) stopped: AtomicBool,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) consecutive_failures: AtomicU32,

    /// Highest worker index handed out so far
    pub(crate) spawned_count: AtomicUsize,

    /// Set when free slots still need filling on the next tick
    pub(crate) refill_needed: AtomicBool,
}

impl TeamRuntime {
    /// Create a team: write its state, open its session and spawn the
    /// initial workers. On any failure the session and state are removed.
    pub async fn create(spec: TeamSpec, ctx: RuntimeContext) -> Result<Arc<Self>> {
        validate_team_name(&spec.team_name)?;
        if spec.tasks.is_empty() {
            return Err(Error::InvalidInput("A team needs at least one task".into()));
        }
        if spec.agent_types.is_empty() || spec.agent_types.iter().any(|a| a.as_str().is_empty()) {
            return Err(Error::InvalidInput(
                "A team needs at least one non-empty agent type".into(),
            ));
        }

        let limit = spec.tasks.len().min(ctx.settings.max_workers).max(1);
        let concurrency = spec
            .concurrency
            .unwrap_or(spec.agent_types.len())
            .clamp(1, limit);

        let paths = TeamPaths::new(&ctx.cwd, &spec.team_name);
        if paths.team().exists(CONFIG_FILE) {
            return Err(Error::InvalidInput(format!(
                "Team '{}' already exists",
                spec.team_name
            )));
        }

        let layout = ctx
            .panes
            .create_session(&spec.team_name, 0, &ctx.cwd)
            .await?;

        let config = TeamConfig {
            team_name: spec.team_name.clone(),
            session_name: layout.session_name,
            leader_pane_id: layout.leader_pane_id,
            agent_types: spec.agent_types,
            tasks: spec.tasks,
            concurrency,
            created_at: Utc::now(),
        };
        let runtime = Arc::new(Self::assemble(config, paths, ctx, WorkerRegistry::default(), 0));

        if let Err(e) = runtime.bootstrap().await {
            warn!(team = %runtime.team_name(), "Team creation failed, tearing down: {}", e);
            runtime.abort_create().await;
            return Err(e);
        }

        info!(
            team = %runtime.team_name(),
            session = %runtime.session_name(),
            workers = runtime.active_count(),
            "Team created"
        );
        Ok(runtime)
    }

    pub(crate) fn assemble(
        config: TeamConfig,
        paths: TeamPaths,
        ctx: RuntimeContext,
        registry: WorkerRegistry,
        spawned_count: usize,
    ) -> Self {
        let store = TaskStore::new(&paths, &config.team_name, &ctx.settings);
        Self {
            config,
            cwd: ctx.cwd,
            paths,
            store,
            panes: ctx.panes,
            settings: ctx.settings,
            tracking_path: ctx.tracking_path,
            workers: RwLock::new(registry),
            tick_running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            spawned_count: AtomicUsize::new(spawned_count),
            refill_needed: AtomicBool::new(false),
        }
    }

    async fn bootstrap(&self) -> Result<()> {
        self.paths.team().save(CONFIG_FILE, &self.config)?;
        self.store.create_tasks(&self.config.tasks)?;

        for _ in 0..self.config.concurrency {
            if self.spawn_next().await?.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn abort_create(&self) {
        let panes = self.worker_pane_ids();
        if let Err(e) = self
            .panes
            .kill_session(self.session_name(), &panes, self.leader_pane_id())
            .await
        {
            warn!(team = %self.team_name(), "Failed to kill session: {}", e);
        }
        if let Err(e) = self.paths.team().remove_all() {
            warn!(team = %self.team_name(), "Failed to remove team state: {}", e);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn team_name(&self) -> &str {
        &self.config.team_name
    }

    pub fn session_name(&self) -> &str {
        &self.config.session_name
    }

    pub fn leader_pane_id(&self) -> &str {
        &self.config.leader_pane_id
    }

    pub fn config(&self) -> &TeamConfig {
        &self.config
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn paths(&self) -> &TeamPaths {
        &self.paths
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn pane_manager(&self) -> &Arc<dyn PaneManager> {
        &self.panes
    }

    /// Copy of the active worker map
    pub fn active_workers(&self) -> WorkerTable {
        self.workers.read().active.clone()
    }

    pub fn active_count(&self) -> usize {
        self.workers.read().active.len()
    }

    /// Every worker name spawned by this runtime
    pub fn worker_names(&self) -> Vec<String> {
        self.workers.read().worker_names.clone()
    }

    /// Live worker panes in split order
    pub fn worker_pane_ids(&self) -> Vec<String> {
        self.workers.read().worker_pane_ids.clone()
    }

    /// Consecutive stalled ticks observed for a worker
    pub fn unresponsive_count(&self, worker_name: &str) -> u32 {
        self.workers
            .read()
            .unresponsive
            .get(worker_name)
            .copied()
            .unwrap_or(0)
    }

    /// Watchdog stopped (fatal escalation, shutdown or team done)
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub(crate) fn record_worker(&self, worker_name: &str, worker: ActiveWorker) {
        let mut reg = self.workers.write();
        if !reg.worker_names.iter().any(|n| n == worker_name) {
            reg.worker_names.push(worker_name.to_string());
        }
        if !reg.worker_pane_ids.contains(&worker.pane_id) {
            reg.worker_pane_ids.push(worker.pane_id.clone());
        }
        reg.unresponsive.remove(worker_name);
        reg.active.insert(worker_name.to_string(), worker);
    }

    pub(crate) fn remove_worker(&self, worker_name: &str) -> Option<ActiveWorker> {
        let mut reg = self.workers.write();
        reg.unresponsive.remove(worker_name);
        let worker = reg.active.remove(worker_name)?;
        reg.worker_pane_ids.retain(|p| p != &worker.pane_id);
        Some(worker)
    }

    /// Pane a new worker splits from: the newest live worker pane, else the leader
    pub(crate) fn split_target(&self) -> String {
        self.workers
            .read()
            .worker_pane_ids
            .last()
            .cloned()
            .unwrap_or_else(|| self.config.leader_pane_id.clone())
    }

    /// Best-effort write of `workers.json` and the pane tracking file
    pub(crate) fn persist_topology(&self) {
        let (table, pane_ids) = {
            let reg = self.workers.read();
            (reg.active.clone(), reg.worker_pane_ids.clone())
        };

        if let Err(e) = self.paths.team().save(WORKERS_FILE, &table) {
            warn!(team = %self.team_name(), "Failed to persist worker table: {}", e);
        }

        if let Some(path) = &self.tracking_path {
            let tracking = PaneTracking {
                pane_ids,
                leader_pane_id: self.config.leader_pane_id.clone(),
            };
            if let Err(e) = tracking::write_tracking(path, &tracking) {
                warn!(team = %self.team_name(), path = %path.display(), "Failed to write pane tracking file: {}", e);
            }
        }
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Poll the task store until every task is terminal. Returns `false` on
    /// timeout.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<bool> {
        let poll = self.settings.watchdog_interval().max(Duration::from_millis(10));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.store.counts()?.all_terminal() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(team = %self.team_name(), "wait_for_completion timed out");
                return Ok(false);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for TeamRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamRuntime")
            .field("team_name", &self.config.team_name)
            .field("session_name", &self.config.session_name)
            .field("pane_manager", &self.panes.name())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use team_pane::MockPaneManager;
    use tempfile::tempdir;

    fn ctx(dir: &Path, mock: Arc<MockPaneManager>) -> RuntimeContext {
        RuntimeContext::new(dir, mock, RuntimeSettings::for_tests()).with_tracking_path(None)
    }

    fn spec(name: &str, tasks: usize, concurrency: Option<usize>) -> TeamSpec {
        TeamSpec {
            team_name: name.to_string(),
            agent_types: vec![AgentKind::Codex],
            tasks: (1..=tasks)
                .map(|i| TaskSpec::new(format!("t{}", i), ""))
                .collect(),
            concurrency,
        }
    }

    #[tokio::test]
    async fn test_create_writes_state_and_spawns_up_to_concurrency() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let rt = TeamRuntime::create(spec("alpha", 3, Some(2)), ctx(dir.path(), mock.clone()))
            .await
            .unwrap();

        assert_eq!(rt.config().concurrency, 2);
        assert_eq!(rt.active_count(), 2);
        assert!(rt.paths().team().exists(CONFIG_FILE));
        assert!(rt.paths().team().exists(WORKERS_FILE));

        let tasks = rt.store().list().unwrap();
        assert_eq!(tasks[0].status, TaskStatus::InProgress);
        assert_eq!(tasks[1].status, TaskStatus::InProgress);
        assert_eq!(tasks[2].status, TaskStatus::Pending);
        assert!(mock.session_alive("omc-team-alpha"));
    }

    #[tokio::test]
    async fn test_concurrency_clamped_to_task_count() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let rt = TeamRuntime::create(spec("beta", 2, Some(9)), ctx(dir.path(), mock))
            .await
            .unwrap();
        assert_eq!(rt.config().concurrency, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());

        let err = TeamRuntime::create(spec("bad name", 1, None), ctx(dir.path(), mock.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let err = TeamRuntime::create(spec("empty", 0, None), ctx(dir.path(), mock))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn test_create_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        mock.fail_splits(true);

        let err = TeamRuntime::create(spec("gamma", 2, None), ctx(dir.path(), mock.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "worker_launch_failed");
        assert!(!mock.session_alive("omc-team-gamma"));
        assert!(!TeamPaths::new(dir.path(), "gamma").root().exists());
    }

    #[tokio::test]
    async fn test_duplicate_team_is_rejected() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        TeamRuntime::create(spec("delta", 1, None), ctx(dir.path(), mock.clone()))
            .await
            .unwrap();
        let err = TeamRuntime::create(spec("delta", 1, None), ctx(dir.path(), mock))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
