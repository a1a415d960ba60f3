//! Explicit task assignment
//!
//! All-or-nothing: if the worker cannot be notified, the task file is put
//! back to its exact pre-call status, owner and assignment time.

use crate::bootstrap;
use crate::paths::TeamPaths;
use crate::runtime::TeamRuntime;
use crate::spawn::send_with_retry;
use crate::state::TaskStatus;
use crate::store::{TaskStore, Transition};
use crate::task::{TaskSnapshot, TeamTask};
use chrono::Utc;
use std::path::Path;
use team_foundation::{Error, Result, RuntimeSettings};
use team_pane::PaneManager;
use tracing::{info, warn};

/// Target of an assignment
#[derive(Debug, Clone)]
pub struct Assignment<'a> {
    pub team_name: &'a str,
    pub task_id: &'a str,
    pub worker_name: &'a str,
    pub pane_id: &'a str,
    pub session_name: &'a str,
}

/// Assign `task_id` to a running worker and nudge it through its pane
pub async fn assign_task(
    panes: &dyn PaneManager,
    settings: &RuntimeSettings,
    cwd: &Path,
    assignment: &Assignment<'_>,
) -> Result<TeamTask> {
    let paths = TeamPaths::new(cwd, assignment.team_name);
    let store = TaskStore::new(&paths, assignment.team_name, settings);
    let now = Utc::now();

    let mut snapshot: Option<TaskSnapshot> = None;
    let transition = store
        .update(assignment.task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            snapshot = Some(task.snapshot());
            task.status = TaskStatus::InProgress;
            task.owner = Some(assignment.worker_name.to_string());
            task.assigned_at = Some(now);
            true
        })
        .await?;

    let task = match transition {
        Transition::Applied(task) => task,
        Transition::Rejected(task) => {
            return Err(Error::InvalidInput(format!(
                "Task {} is already {}",
                task.id,
                task.status.as_str()
            )))
        }
        Transition::Busy => return Err(store.lock_error(assignment.task_id)),
    };
    let snapshot = snapshot.ok_or_else(|| Error::Internal("assignment snapshot missing".into()))?;

    let delivered = match bootstrap::append_assignment(&paths, assignment.worker_name, &task) {
        Ok(()) => {
            let trigger =
                bootstrap::assignment_trigger(&task.id, &paths.inbox(assignment.worker_name));
            send_with_retry(
                panes,
                settings,
                assignment.session_name,
                assignment.pane_id,
                &trigger,
            )
            .await
        }
        Err(e) => {
            warn!(worker = %assignment.worker_name, "Failed to append assignment: {}", e);
            false
        }
    };

    if !delivered {
        match store
            .restore(assignment.task_id, &snapshot, assignment.worker_name)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %assignment.task_id, "Task changed before rollback; left as is"),
            Err(e) => warn!(task_id = %assignment.task_id, "Failed to restore task after assignment failure: {}", e),
        }
        return Err(Error::notify_failed(assignment.worker_name, "assignment"));
    }

    info!(
        team = %assignment.team_name,
        worker = %assignment.worker_name,
        task_id = %task.id,
        pane_id = %assignment.pane_id,
        "Task assigned"
    );
    Ok(task)
}

impl TeamRuntime {
    /// Assign `task_id` to one of this runtime's active workers. The worker
    /// then owns the task on disk, so the watchdog supervises it together
    /// with the task the worker was spawned for.
    pub async fn assign(&self, task_id: &str, worker_name: &str) -> Result<TeamTask> {
        let pane_id = self
            .workers
            .read()
            .active
            .get(worker_name)
            .map(|w| w.pane_id.clone())
            .ok_or_else(|| Error::NotFound(format!("Worker {} is not active", worker_name)))?;

        assign_task(
            self.panes.as_ref(),
            &self.settings,
            &self.cwd,
            &Assignment {
                team_name: self.team_name(),
                task_id,
                worker_name,
                pane_id: &pane_id,
                session_name: self.session_name(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;
    use team_pane::MockPaneManager;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (TaskStore, MockPaneManager, String) {
        let paths = TeamPaths::new(dir, "asg");
        let store = TaskStore::new(&paths, "asg", &RuntimeSettings::for_tests());
        store
            .create_tasks(&[TaskSpec::new("a", ""), TaskSpec::new("b", "")])
            .unwrap();
        let mock = MockPaneManager::new();
        mock.add_session("omc-team-asg");
        let pane = mock.add_pane("omc-team-asg");
        (store, mock, pane)
    }

    #[tokio::test]
    async fn test_assign_sets_owner_and_notifies() {
        let dir = tempdir().unwrap();
        let (store, mock, pane) = setup(dir.path());
        let assignment = Assignment {
            team_name: "asg",
            task_id: "2",
            worker_name: "worker-1",
            pane_id: &pane,
            session_name: "omc-team-asg",
        };

        let task = assign_task(&mock, &RuntimeSettings::for_tests(), dir.path(), &assignment)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(store.read("2").unwrap().unwrap().owner.as_deref(), Some("worker-1"));
        assert_eq!(mock.sent_text(&pane).len(), 1);
    }

    #[tokio::test]
    async fn test_assign_rejects_terminal_task() {
        let dir = tempdir().unwrap();
        let (store, mock, pane) = setup(dir.path());
        store.claim("1", "worker-1").await.unwrap().unwrap();
        store
            .finish("1", TaskStatus::Completed, "ok", None)
            .await
            .unwrap();

        let assignment = Assignment {
            team_name: "asg",
            task_id: "1",
            worker_name: "worker-2",
            pane_id: &pane,
            session_name: "omc-team-asg",
        };
        let err = assign_task(&mock, &RuntimeSettings::for_tests(), dir.path(), &assignment)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(mock.sent_text(&pane).is_empty());
    }

    #[tokio::test]
    async fn test_runtime_assign_targets_worker_pane() {
        use crate::agent::AgentKind;
        use crate::runtime::{RuntimeContext, TeamSpec};
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let mock = Arc::new(MockPaneManager::new());
        let spec = TeamSpec {
            team_name: "rta".into(),
            agent_types: vec![AgentKind::Codex],
            tasks: (1..=3).map(|i| TaskSpec::new(format!("t{}", i), "")).collect(),
            concurrency: Some(2),
        };
        let ctx = RuntimeContext::new(dir.path(), mock.clone(), RuntimeSettings::for_tests())
            .with_tracking_path(None);
        let rt = TeamRuntime::create(spec, ctx).await.unwrap();
        let workers = rt.active_workers();
        let (first, second) = (&workers["worker-1"].pane_id, &workers["worker-2"].pane_id);

        let err = rt.assign("3", "worker-7").await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        mock.fail_sends_to(first);
        let err = rt.assign("3", "worker-1").await.unwrap_err();
        assert_eq!(err.code(), "worker_notify_failed");
        assert_eq!(rt.store().read("3").unwrap().unwrap().status, TaskStatus::Pending);

        let task = rt.assign("3", "worker-2").await.unwrap();
        assert_eq!(task.owner.as_deref(), Some("worker-2"));
        assert_eq!(mock.sent_text(second).len(), 1);
    }
}
