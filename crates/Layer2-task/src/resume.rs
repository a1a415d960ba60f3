//! Resume protocol
//!
//! Rebuilds a runtime for a team whose supervisor process went away. The
//! active-worker map is reconstructed from in-progress tasks: `workers.json`
//! is trusted when its pane is still alive, otherwise worker-N maps to the
//! N-th non-leader pane. In-progress tasks whose worker cannot be found are
//! failed, the same way a dead pane is.

use crate::agent::agent_for_worker;
use crate::paths::{validate_team_name, worker_index, TeamPaths, CONFIG_FILE, WORKERS_FILE};
use crate::runtime::{ActiveWorker, RuntimeContext, TeamConfig, TeamRuntime, WorkerRegistry, WorkerTable};
use crate::state::TaskStatus;
use crate::store::TaskStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use team_foundation::Result;
use tracing::{info, warn};

pub const WORKER_LOST_SUMMARY: &str = "no live worker owns this task";

impl TeamRuntime {
    /// Reattach to an existing team. `Ok(None)` means there is no team to
    /// resume (no state, or its session is gone).
    pub async fn resume(team_name: &str, ctx: RuntimeContext) -> Result<Option<Arc<Self>>> {
        validate_team_name(team_name)?;
        let paths = TeamPaths::new(&ctx.cwd, team_name);

        let Some(config) = paths.team().load_optional::<TeamConfig>(CONFIG_FILE)? else {
            info!(team = %team_name, "No team state to resume");
            return Ok(None);
        };
        if !ctx.panes.session_exists(&config.session_name).await {
            info!(team = %team_name, session = %config.session_name, "Session is gone; nothing to resume");
            return Ok(None);
        }
        let live = match ctx.panes.list_panes(&config.session_name).await {
            Ok(panes) => panes,
            Err(e) => {
                warn!(team = %team_name, "Cannot list panes: {}", e);
                return Ok(None);
            }
        };

        let leader = if live.contains(&config.leader_pane_id) {
            config.leader_pane_id.clone()
        } else {
            live.first().cloned().unwrap_or_else(|| config.leader_pane_id.clone())
        };
        let worker_panes: Vec<String> = live.into_iter().filter(|p| p != &leader).collect();

        let table: WorkerTable = paths
            .team()
            .load_optional(WORKERS_FILE)
            .unwrap_or_else(|e| {
                warn!(team = %team_name, "Unreadable worker table: {}", e);
                None
            })
            .unwrap_or_default();

        let store = TaskStore::new(&paths, team_name, &ctx.settings);
        let tasks = store.list()?;

        let mut registry = WorkerRegistry::default();
        let mut used_panes: HashSet<String> = HashSet::new();
        let mut highest = table.keys().filter_map(|n| worker_index(n)).max().unwrap_or(0);

        let in_progress: HashSet<(&str, &str)> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter_map(|t| Some((t.owner.as_deref()?, t.id.as_str())))
            .collect();

        for task in tasks.iter().filter(|t| t.status == TaskStatus::InProgress) {
            let Some(owner) = task.owner.as_deref() else {
                continue;
            };
            let index = worker_index(owner);
            highest = highest.max(index.unwrap_or(0));

            // 이미 매핑된 worker 가 추가로 배정받은 task
            if registry.active.contains_key(owner) {
                continue;
            }

            let from_table = table
                .get(owner)
                .filter(|w| worker_panes.contains(&w.pane_id))
                .filter(|w| !used_panes.contains(&w.pane_id))
                .cloned()
                .map(|mut w| {
                    if !in_progress.contains(&(owner, w.task_id.as_str())) {
                        w.task_id = task.id.clone();
                    }
                    w
                });

            let mapped = from_table.or_else(|| {
                let pane_id = worker_panes.get(index? - 1)?;
                if used_panes.contains(pane_id) {
                    return None;
                }
                Some(ActiveWorker {
                    pane_id: pane_id.clone(),
                    task_id: task.id.clone(),
                    agent_type: agent_for_worker(&config.agent_types, index?)?.clone(),
                    spawned_at: task.assigned_at.unwrap_or_else(Utc::now),
                })
            });

            match mapped {
                Some(worker) => {
                    used_panes.insert(worker.pane_id.clone());
                    registry.worker_names.push(owner.to_string());
                    registry.active.insert(owner.to_string(), worker);
                }
                None => {
                    warn!(team = %team_name, worker = %owner, task_id = %task.id, "Worker lost; failing its task");
                    store
                        .finish(&task.id, TaskStatus::Failed, WORKER_LOST_SUMMARY, None)
                        .await?;
                }
            }
        }

        registry.worker_pane_ids = worker_panes
            .into_iter()
            .filter(|p| used_panes.contains(p))
            .collect();

        let runtime = Self::assemble(config, paths, ctx, registry, highest);
        runtime.refill_needed.store(true, Ordering::Release);
        runtime.persist_topology();

        info!(
            team = %runtime.team_name(),
            workers = runtime.active_count(),
            "Team resumed"
        );
        Ok(Some(Arc::new(runtime)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::runtime::TeamSpec;
    use crate::task::TaskSpec;
    use team_foundation::RuntimeSettings;
    use team_pane::{MockPaneManager, PaneManager};
    use tempfile::tempdir;

    fn ctx(dir: &std::path::Path, mock: Arc<MockPaneManager>) -> RuntimeContext {
        RuntimeContext::new(dir, mock, RuntimeSettings::for_tests()).with_tracking_path(None)
    }

    async fn create(dir: &std::path::Path, mock: Arc<MockPaneManager>) -> Arc<TeamRuntime> {
        let spec = TeamSpec {
            team_name: "rs".into(),
            agent_types: vec![AgentKind::Codex, AgentKind::Gemini],
            tasks: (1..=3).map(|i| TaskSpec::new(format!("t{}", i), "")).collect(),
            concurrency: Some(2),
        };
        TeamRuntime::create(spec, ctx(dir, mock)).await.unwrap()
    }

    #[tokio::test]
    async fn test_resume_without_team() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let resumed = TeamRuntime::resume("ghost", ctx(dir.path(), mock)).await.unwrap();
        assert!(resumed.is_none());
    }

    #[tokio::test]
    async fn test_resume_uses_worker_table() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let original = create(dir.path(), mock.clone()).await.active_workers();

        let rt = TeamRuntime::resume("rs", ctx(dir.path(), mock)).await.unwrap().unwrap();
        assert_eq!(rt.active_workers(), original);
        assert_eq!(rt.worker_pane_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_positional_fallback() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let original = create(dir.path(), mock.clone()).await;
        let expected = original.active_workers();
        original.paths().team().remove(WORKERS_FILE).unwrap();

        let rt = TeamRuntime::resume("rs", ctx(dir.path(), mock)).await.unwrap().unwrap();
        let active = rt.active_workers();
        assert_eq!(active["worker-1"].pane_id, expected["worker-1"].pane_id);
        assert_eq!(active["worker-2"].pane_id, expected["worker-2"].pane_id);
        assert_eq!(active["worker-2"].agent_type, AgentKind::Gemini);
    }

    #[tokio::test]
    async fn test_resume_fails_tasks_of_lost_workers() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let original = create(dir.path(), mock.clone()).await;
        let lost = original.active_workers()["worker-2"].pane_id.clone();
        mock.kill_externally(&lost);

        let rt = TeamRuntime::resume("rs", ctx(dir.path(), mock)).await.unwrap().unwrap();
        assert_eq!(rt.active_count(), 1);
        let task = rt.store().read("2").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.summary.as_deref(), Some(WORKER_LOST_SUMMARY));

        // Next worker name continues after the highest seen
        let report = rt.tick().await.unwrap();
        assert_eq!(report.spawned, vec!["worker-3"]);
    }

    #[tokio::test]
    async fn test_resume_keeps_every_task_of_a_worker() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let original = create(dir.path(), mock.clone()).await;
        original.assign("3", "worker-1").await.unwrap();

        let rt = TeamRuntime::resume("rs", ctx(dir.path(), mock)).await.unwrap().unwrap();
        assert_eq!(rt.active_count(), 2);
        for id in ["1", "3"] {
            let task = rt.store().read(id).unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::InProgress);
            assert_eq!(task.owner.as_deref(), Some("worker-1"));
        }
        assert_eq!(rt.active_workers()["worker-1"].task_id, "1");
    }

    #[tokio::test]
    async fn test_resume_after_session_loss() {
        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let original = create(dir.path(), mock.clone()).await;
        mock.kill_session(original.session_name(), &[], original.leader_pane_id())
            .await
            .unwrap();

        let resumed = TeamRuntime::resume("rs", ctx(dir.path(), mock)).await.unwrap();
        assert!(resumed.is_none());
    }
}
