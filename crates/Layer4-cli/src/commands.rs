//! Subcommand implementations

use anyhow::{anyhow, bail, Context};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use team_foundation::RuntimeSettings;
use team_pane::{PaneManager, TmuxPaneManager};
use team_runtime::paths::{CONFIG_FILE, WORKERS_FILE};
use team_runtime::{
    assign_task, read_team_status, shutdown_team, AgentKind, Assignment, RuntimeContext,
    ShutdownReport, TaskSpec, TeamConfig, TeamPaths, TeamPhase, TeamRuntime, TeamSpec,
    TeamStatus, WorkerTable,
};
use tracing::{info, warn};

/// "subject" or "subject: description"
pub fn parse_task(raw: &str) -> anyhow::Result<TaskSpec> {
    let (subject, description) = match raw.split_once(':') {
        Some((subject, description)) => (subject.trim(), description.trim()),
        None => (raw.trim(), ""),
    };
    if subject.is_empty() {
        bail!("Task subject is empty: {:?}", raw);
    }
    Ok(TaskSpec::new(subject, description))
}

/// Tasks from `--task` flags followed by the tasks file, in order
pub fn collect_tasks(raw: &[String], file: Option<&Path>) -> anyhow::Result<Vec<TaskSpec>> {
    let mut tasks = raw
        .iter()
        .map(|t| parse_task(t))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if let Some(file) = file {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let from_file: Vec<TaskSpec> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        tasks.extend(from_file);
    }

    if tasks.is_empty() {
        bail!("No tasks given; use --task or --tasks-file");
    }
    Ok(tasks)
}

pub fn team_spec(team: String, agents: &[String], tasks: Vec<TaskSpec>, concurrency: Option<usize>) -> TeamSpec {
    TeamSpec {
        team_name: team,
        agent_types: agents.iter().map(|a| AgentKind::parse(a)).collect(),
        tasks,
        concurrency,
    }
}

fn tmux() -> anyhow::Result<Arc<TmuxPaneManager>> {
    let panes = TmuxPaneManager::new();
    if !panes.is_available() {
        bail!("tmux not found in PATH");
    }
    Ok(Arc::new(panes))
}

fn context(cwd: &Path) -> anyhow::Result<RuntimeContext> {
    let settings = RuntimeSettings::load(cwd)?;
    Ok(RuntimeContext::new(cwd, tmux()?, settings))
}

// ============================================================================
// start / resume
// ============================================================================

pub async fn start(cwd: &Path, spec: TeamSpec, detach: bool) -> anyhow::Result<()> {
    let runtime = TeamRuntime::create(spec, context(cwd)?).await?;
    println!(
        "🚀 Team '{}' started in session {} ({} workers)",
        runtime.team_name(),
        runtime.session_name(),
        runtime.active_count()
    );
    supervise(runtime, detach).await
}

pub async fn resume(cwd: &Path, team: &str, detach: bool) -> anyhow::Result<()> {
    let Some(runtime) = TeamRuntime::resume(team, context(cwd)?).await? else {
        bail!("No running team named '{}'", team);
    };
    println!(
        "🔁 Team '{}' resumed ({} workers still active)",
        runtime.team_name(),
        runtime.active_count()
    );
    supervise(runtime, detach).await
}

/// Watchdog in the foreground until the team settles or Ctrl-C
async fn supervise(runtime: Arc<TeamRuntime>, detach: bool) -> anyhow::Result<()> {
    let watchdog = runtime.spawn_watchdog();

    let interrupted = tokio::select! {
        joined = watchdog => {
            joined.context("watchdog task panicked")?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(team = %runtime.team_name(), "Interrupted");
            true
        }
    };

    let status = runtime.status().await?;
    print_summary(&status);

    if status.phase == TeamPhase::WatchdogFailed {
        // 상태 파일은 조사용으로 남겨둠
        bail!(
            "Watchdog gave up on team '{}'; state left in {}",
            runtime.team_name(),
            runtime.paths().root().display()
        );
    }
    if detach {
        println!(
            "Team left running. Use 'omc-team resume {0}' or 'omc-team shutdown {0}'.",
            runtime.team_name()
        );
        return Ok(());
    }
    if interrupted {
        warn!(team = %runtime.team_name(), "Shutting down before all tasks settled");
    }

    let report = runtime.shutdown(None).await?;
    print_shutdown(&report);
    Ok(())
}

fn print_summary(status: &TeamStatus) {
    let counts = &status.task_counts;
    println!("\n📋 Team {} - {:?}\n", status.team_name, status.phase);
    println!(
        "{:<12} {:<12} {:<12} {:<12}",
        "Pending", "In progress", "Completed", "Failed"
    );
    println!("{}", "-".repeat(48));
    println!(
        "{:<12} {:<12} {:<12} {:<12}",
        counts.pending, counts.in_progress, counts.completed, counts.failed
    );

    for worker in &status.workers {
        let state = if !worker.alive {
            "dead"
        } else if worker.stalled {
            "stalled"
        } else {
            "alive"
        };
        println!(
            "  {:<12} {:<8} task {}",
            worker.worker_name,
            state,
            worker.current_task_id.as_deref().unwrap_or("-")
        );
    }
    println!();
}

fn print_shutdown(report: &ShutdownReport) {
    if report.ack_polling_skipped {
        println!("✓ Team shut down");
    } else {
        println!(
            "✓ Team shut down ({}/{} acks{})",
            report.acks_received,
            report.acks_expected,
            if report.timed_out { ", timed out" } else { "" }
        );
    }
}

// ============================================================================
// status / assign / shutdown
// ============================================================================

pub fn status(cwd: &Path, team: &str) -> anyhow::Result<()> {
    let settings = RuntimeSettings::load(cwd)?;
    let status = read_team_status(cwd, team, &settings)?
        .ok_or_else(|| anyhow!("No team named '{}'", team))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn assign(cwd: &Path, team: &str, task_id: &str, worker: &str) -> anyhow::Result<()> {
    let settings = RuntimeSettings::load(cwd)?;
    let paths = TeamPaths::new(cwd, team);
    let config: TeamConfig = paths
        .team()
        .load_optional(CONFIG_FILE)?
        .ok_or_else(|| anyhow!("No team named '{}'", team))?;
    let workers: WorkerTable = paths.team().load_optional(WORKERS_FILE)?.unwrap_or_default();
    let pane_id = workers
        .get(worker)
        .map(|w| w.pane_id.clone())
        .ok_or_else(|| anyhow!("Worker '{}' is not active in team '{}'", worker, team))?;

    let panes = tmux()?;
    let task = assign_task(
        panes.as_ref(),
        &settings,
        cwd,
        &Assignment {
            team_name: team,
            task_id,
            worker_name: worker,
            pane_id: &pane_id,
            session_name: &config.session_name,
        },
    )
    .await?;

    println!("✓ Task {} ({}) assigned to {}", task.id, task.subject, worker);
    Ok(())
}

pub async fn shutdown(cwd: &Path, team: &str, timeout_ms: Option<u64>, reason: Option<String>) -> anyhow::Result<()> {
    let settings = RuntimeSettings::load(cwd)?;
    let panes = tmux()?;
    let report = shutdown_team(
        cwd,
        team,
        panes.as_ref(),
        &settings,
        timeout_ms.map(Duration::from_millis),
        reason,
    )
    .await?
    .ok_or_else(|| anyhow!("No team named '{}'", team))?;

    print_shutdown(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_task() {
        let task = parse_task("fix login: handle expired tokens").unwrap();
        assert_eq!(task.subject, "fix login");
        assert_eq!(task.description, "handle expired tokens");

        let task = parse_task("  write changelog ").unwrap();
        assert_eq!(task.subject, "write changelog");
        assert!(task.description.is_empty());

        assert!(parse_task(": no subject").is_err());
    }

    #[test]
    fn test_collect_tasks_from_flags_and_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("tasks.json");
        std::fs::write(
            &file,
            r#"[{"subject": "b", "description": "from file"}, {"subject": "c"}]"#,
        )
        .unwrap();

        let tasks = collect_tasks(&["a".to_string()], Some(&file)).unwrap();
        let subjects: Vec<_> = tasks.iter().map(|t| t.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a", "b", "c"]);
        assert_eq!(tasks[1].description, "from file");
    }

    #[test]
    fn test_collect_tasks_rejects_empty() {
        assert!(collect_tasks(&[], None).is_err());

        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, "{").unwrap();
        assert!(collect_tasks(&[], Some(&file)).is_err());
    }

    #[test]
    fn test_team_spec_agent_types() {
        let spec = team_spec(
            "t".into(),
            &["claude".into(), "Codex".into(), "./my-agent".into()],
            vec![TaskSpec::new("x", "")],
            None,
        );
        assert_eq!(spec.agent_types[0], AgentKind::Claude);
        assert_eq!(spec.agent_types[1], AgentKind::Codex);
        assert_eq!(spec.agent_types[2], AgentKind::Custom("./my-agent".into()));
    }
}
