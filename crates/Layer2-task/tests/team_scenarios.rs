//! 팀 런타임 통합 테스트 - MockPaneManager 로 tmux 없이 전체 흐름 검증
//!
//! `cargo test -p team-runtime --test team_scenarios`

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use team_foundation::RuntimeSettings;
use team_pane::MockPaneManager;
use team_runtime::paths::{DONE_FILE, HEARTBEAT_FILE};
use team_runtime::{
    assign_task, AgentKind, Assignment, DoneSignal, Heartbeat, RuntimeContext, TaskSpec,
    TaskStatus, TaskStore, TeamPaths, TeamPhase, TeamRuntime, TeamSpec,
};
use tempfile::tempdir;

fn spec(name: &str, agent: AgentKind, tasks: usize, concurrency: usize) -> TeamSpec {
    TeamSpec {
        team_name: name.to_string(),
        agent_types: vec![agent],
        tasks: (1..=tasks)
            .map(|i| TaskSpec::new(format!("task {}", i), format!("details for task {}", i)))
            .collect(),
        concurrency: Some(concurrency),
    }
}

fn ctx(dir: &Path, mock: &Arc<MockPaneManager>, settings: RuntimeSettings) -> RuntimeContext {
    RuntimeContext::new(dir, mock.clone(), settings).with_tracking_path(None)
}

async fn create(
    dir: &Path,
    mock: &Arc<MockPaneManager>,
    spec: TeamSpec,
    settings: RuntimeSettings,
) -> Arc<TeamRuntime> {
    TeamRuntime::create(spec, ctx(dir, mock, settings))
        .await
        .expect("team creation failed")
}

fn worker_on(rt: &TeamRuntime, task_id: &str) -> (String, String) {
    rt.active_workers()
        .into_iter()
        .find(|(_, w)| w.task_id == task_id)
        .map(|(name, w)| (name, w.pane_id))
        .expect("no worker on task")
}

// ============================================================================
// Watchdog scenarios
// ============================================================================

#[tokio::test]
async fn test_done_signal_completes_task_and_spawns_next() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s1", AgentKind::Codex, 3, 1), RuntimeSettings::for_tests()).await;

    let (worker, pane) = worker_on(&rt, "1");
    rt.paths()
        .worker(&worker)
        .save_text(DONE_FILE, r#"{"taskId":"1","status":"completed","summary":"ok"}"#)
        .unwrap();

    let report = rt.tick().await.unwrap();
    assert_eq!(report.completed, vec!["1"]);
    assert_eq!(report.spawned.len(), 1);

    let task = rt.store().read("1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.summary.as_deref(), Some("ok"));
    assert!(task.completed_at.is_some());

    assert!(mock.killed_panes().contains(&pane));
    assert!(!rt.paths().done(&worker).exists());

    let (next_worker, _) = worker_on(&rt, "2");
    assert_ne!(next_worker, worker);
    assert_eq!(rt.store().read("2").unwrap().unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_dead_pane_fails_task_and_spawns_next() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s2", AgentKind::Codex, 3, 1), RuntimeSettings::for_tests()).await;

    let (worker, _) = worker_on(&rt, "1");
    rt.paths()
        .worker(&worker)
        .save(DONE_FILE, &DoneSignal::completed("1", "ok"))
        .unwrap();
    rt.tick().await.unwrap();

    let (_, pane) = worker_on(&rt, "2");
    mock.kill_externally(&pane);

    let report = rt.tick().await.unwrap();
    assert_eq!(report.failed, vec!["2"]);

    let task = rt.store().read("2").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.summary.unwrap().contains("pane died"));
    assert!(task.failed_at.is_some());

    worker_on(&rt, "3");
    assert_eq!(rt.active_count(), 1);
}

fn stall_settings() -> RuntimeSettings {
    RuntimeSettings {
        stall_threshold_ms: 1_000,
        unresponsive_kill_threshold: 3,
        ..RuntimeSettings::for_tests()
    }
}

fn stale_heartbeat(task_id: &str) -> Heartbeat {
    Heartbeat {
        updated_at: Utc::now() - chrono::Duration::minutes(10),
        current_task_id: Some(task_id.to_string()),
    }
}

#[tokio::test]
async fn test_stalled_worker_is_failed_after_threshold() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s3", AgentKind::Codex, 2, 1), stall_settings()).await;

    let (worker, pane) = worker_on(&rt, "1");
    rt.paths()
        .worker(&worker)
        .save(HEARTBEAT_FILE, &stale_heartbeat("1"))
        .unwrap();

    for expected in 1..=2 {
        let report = rt.tick().await.unwrap();
        assert_eq!(report.stalled, vec![worker.clone()]);
        assert_eq!(rt.unresponsive_count(&worker), expected);
        assert_eq!(rt.store().read("1").unwrap().unwrap().status, TaskStatus::InProgress);
    }

    let report = rt.tick().await.unwrap();
    assert_eq!(report.failed, vec!["1"]);
    assert!(rt
        .store()
        .read("1")
        .unwrap()
        .unwrap()
        .summary
        .unwrap()
        .contains("unresponsive"));
    assert!(mock.killed_panes().contains(&pane));
    worker_on(&rt, "2");
}

#[tokio::test]
async fn test_resumed_heartbeat_resets_stall_counter() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s3b", AgentKind::Codex, 1, 1), stall_settings()).await;

    let (worker, _) = worker_on(&rt, "1");
    let worker_dir = rt.paths().worker(&worker);
    worker_dir.save(HEARTBEAT_FILE, &stale_heartbeat("1")).unwrap();
    rt.tick().await.unwrap();
    rt.tick().await.unwrap();
    assert_eq!(rt.unresponsive_count(&worker), 2);

    worker_dir.save(HEARTBEAT_FILE, &Heartbeat::now("1")).unwrap();
    let report = rt.tick().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(rt.unresponsive_count(&worker), 0);

    // One more stale tick starts counting from zero again
    worker_dir.save(HEARTBEAT_FILE, &stale_heartbeat("1")).unwrap();
    rt.tick().await.unwrap();
    assert_eq!(rt.unresponsive_count(&worker), 1);
    assert_eq!(rt.store().read("1").unwrap().unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_worker_finishes_every_task_assigned_to_it() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s6", AgentKind::Codex, 2, 1), RuntimeSettings::for_tests()).await;
    let (worker, pane) = worker_on(&rt, "1");

    rt.assign("2", &worker).await.unwrap();
    let report = rt.tick().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(rt.store().read("2").unwrap().unwrap().status, TaskStatus::InProgress);

    rt.paths()
        .worker(&worker)
        .save_text(DONE_FILE, r#"{"taskId":"1","status":"completed","summary":"first"}"#)
        .unwrap();
    let report = rt.tick().await.unwrap();
    assert_eq!(report.completed, vec!["1"]);
    assert!(report.spawned.is_empty());
    assert!(!report.team_done);
    assert!(!mock.killed_panes().contains(&pane));
    assert_eq!(rt.active_workers()[&worker].task_id, "2");
    assert_eq!(rt.status().await.unwrap().phase, TeamPhase::Running);

    rt.paths()
        .worker(&worker)
        .save(DONE_FILE, &DoneSignal::completed("2", "second"))
        .unwrap();
    let report = rt.tick().await.unwrap();
    assert_eq!(report.completed, vec!["2"]);
    assert!(report.team_done);
    assert!(mock.killed_panes().contains(&pane));
    assert_eq!(rt.active_count(), 0);
    assert_eq!(rt.status().await.unwrap().phase, TeamPhase::Completed);
}

#[tokio::test]
async fn test_dead_pane_fails_every_task_it_owns() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("s7", AgentKind::Codex, 2, 1), RuntimeSettings::for_tests()).await;
    let (worker, pane) = worker_on(&rt, "1");

    rt.assign("2", &worker).await.unwrap();
    mock.kill_externally(&pane);

    let mut report = rt.tick().await.unwrap();
    report.failed.sort();
    assert_eq!(report.failed, vec!["1", "2"]);
    assert!(report.team_done);
    for id in ["1", "2"] {
        let task = rt.store().read(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.summary.unwrap().contains("pane died"));
    }
    assert_eq!(rt.status().await.unwrap().phase, TeamPhase::CompletedWithFailures);
}

#[tokio::test]
async fn test_tick_with_no_workers_is_noop() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("idle", AgentKind::Gemini, 1, 1), RuntimeSettings::for_tests()).await;

    let (worker, _) = worker_on(&rt, "1");
    rt.paths()
        .worker(&worker)
        .save(DONE_FILE, &DoneSignal::failed("1", "could not reproduce"))
        .unwrap();
    let report = rt.tick().await.unwrap();
    assert_eq!(report.failed, vec!["1"]);
    assert!(report.team_done);

    let started = Instant::now();
    let report = rt.tick().await.unwrap();
    assert!(report.idle);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rt.status().await.unwrap().phase, TeamPhase::CompletedWithFailures);
}

// ============================================================================
// Watchdog loop
// ============================================================================

#[tokio::test]
async fn test_watchdog_drives_every_task_to_terminal() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("loop", AgentKind::Codex, 5, 2), RuntimeSettings::for_tests()).await;

    let watchdog = rt.spawn_watchdog();

    // Fake workers: finish whatever task each active worker owns
    let workers = {
        let rt = Arc::clone(&rt);
        tokio::spawn(async move {
            while !rt.is_stopped() {
                for (name, worker) in rt.active_workers() {
                    let _ = rt
                        .paths()
                        .worker(&name)
                        .save(DONE_FILE, &DoneSignal::completed(worker.task_id, "done"));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    assert!(rt.wait_for_completion(Duration::from_secs(10)).await.unwrap());
    tokio::time::timeout(Duration::from_secs(5), watchdog)
        .await
        .expect("watchdog did not exit")
        .unwrap();
    workers.await.unwrap();

    let counts = rt.store().counts().unwrap();
    assert_eq!(counts.completed, 5);
    assert_eq!(rt.active_count(), 0);
    assert_eq!(rt.status().await.unwrap().phase, TeamPhase::Completed);
}

#[tokio::test]
async fn test_repeated_tick_failures_persist_fatal_marker() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("fatal", AgentKind::Codex, 2, 1), RuntimeSettings::for_tests()).await;

    // Corrupt a task file so every tick fails when counting tasks
    std::fs::write(
        rt.paths().tasks().file_path(&TeamPaths::task_file_name("2")),
        "{broken",
    )
    .unwrap();

    let watchdog = rt.spawn_watchdog();
    tokio::time::timeout(Duration::from_secs(5), watchdog)
        .await
        .expect("watchdog did not stop")
        .unwrap();

    assert!(rt.is_stopped());
    let failure = rt.watchdog_failure().unwrap().expect("marker missing");
    assert_eq!(failure.consecutive_failures, 3);
    assert!(failure.last_error.contains("2.json"));
}

// ============================================================================
// Claims, assignment, shutdown, resume
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_one_winner() {
    let dir = tempdir().unwrap();
    let paths = TeamPaths::new(dir.path(), "race");
    let settings = RuntimeSettings {
        lock_timeout_ms: 2_000,
        ..RuntimeSettings::for_tests()
    };
    let store = TaskStore::new(&paths, "race", &settings);
    store.create_tasks(&[TaskSpec::new("contested", "")]).unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.claim("1", &format!("worker-{}", i)).await })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap().unwrap() {
            winners.push(task.owner.unwrap());
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(
        store.read("1").unwrap().unwrap().owner.as_deref(),
        Some(winners[0].as_str())
    );
}

#[tokio::test]
async fn test_failed_assignment_restores_exact_snapshot() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("asg", AgentKind::Claude, 3, 1), RuntimeSettings::for_tests()).await;
    let (worker, pane) = worker_on(&rt, "1");

    // Pending task
    let before = rt.store().read("2").unwrap().unwrap();
    mock.fail_sends(true);
    let assignment = Assignment {
        team_name: rt.team_name(),
        task_id: "2",
        worker_name: &worker,
        pane_id: &pane,
        session_name: rt.session_name(),
    };
    let err = assign_task(mock.as_ref(), rt.settings(), dir.path(), &assignment)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), format!("worker_notify_failed:{}:assignment", worker));
    assert_eq!(rt.store().read("2").unwrap().unwrap(), before);

    // In-progress task keeps its original owner and assignment time
    let before = rt.store().read("1").unwrap().unwrap();
    let reassignment = Assignment {
        task_id: "1",
        worker_name: "worker-9",
        ..assignment.clone()
    };
    assign_task(mock.as_ref(), rt.settings(), dir.path(), &reassignment)
        .await
        .unwrap_err();
    let after = rt.store().read("1").unwrap().unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.owner, before.owner);
    assert_eq!(after.assigned_at, before.assigned_at);
}

#[tokio::test]
async fn test_shutdown_skips_ack_polling_for_builtin_clis() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let rt = create(dir.path(), &mock, spec("bye", AgentKind::Claude, 2, 2), RuntimeSettings::for_tests()).await;

    let started = Instant::now();
    let report = rt.shutdown(Some(Duration::from_secs(10))).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(report.ack_polling_skipped);
    assert!(!report.timed_out);
    assert!(report.session_killed);
    assert!(!mock.session_alive(rt.session_name()));
    assert!(!rt.paths().root().exists());
}

#[tokio::test]
async fn test_resume_missing_team_returns_none() {
    let dir = tempdir().unwrap();
    let mock = Arc::new(MockPaneManager::new());
    let resumed = TeamRuntime::resume("nobody", ctx(dir.path(), &mock, RuntimeSettings::for_tests()))
        .await
        .unwrap();
    assert!(resumed.is_none());
}

#[tokio::test]
async fn test_pane_tracking_file_follows_topology() {
    let dir = tempdir().unwrap();
    let tracking = dir.path().join("tracking/team-panes-t1.json");
    let mock = Arc::new(MockPaneManager::new());
    let context = ctx(dir.path(), &mock, RuntimeSettings::for_tests())
        .with_tracking_path(Some(tracking.clone()));
    let rt = TeamRuntime::create(spec("track", AgentKind::Codex, 2, 2), context)
        .await
        .unwrap();

    let read = || -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(&tracking).unwrap()).unwrap()
    };
    let json = read();
    assert_eq!(json["leaderPaneId"], rt.leader_pane_id());
    assert_eq!(json["paneIds"].as_array().unwrap().len(), 2);

    let (worker, _) = worker_on(&rt, "1");
    rt.paths()
        .worker(&worker)
        .save(DONE_FILE, &DoneSignal::completed("1", "ok"))
        .unwrap();
    rt.tick().await.unwrap();
    assert_eq!(read()["paneIds"].as_array().unwrap().len(), 1);
}
