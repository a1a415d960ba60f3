//! Worker inbox
//!
//! `inbox.md` is the only instruction channel a worker reads. It is written
//! before the worker launches; explicit assignments append to it.

use crate::paths::{TeamPaths, INBOX_FILE};
use crate::task::TeamTask;
use chrono::Utc;
use std::fmt::Write as _;
use std::path::Path;
use team_foundation::Result;

/// Initial inbox for a worker owning `task`
pub fn render_inbox(paths: &TeamPaths, team_name: &str, worker_name: &str, task: &TeamTask) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Team {} / {}", team_name, worker_name);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Task {}: {}", task.id, task.subject);
    let _ = writeln!(out);
    if !task.description.trim().is_empty() {
        let _ = writeln!(out, "{}", task.description.trim_end());
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "## Protocol");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Execute ONLY task {}. Do not pick up other work, then exit.",
        task.id
    );
    let _ = writeln!(
        out,
        "- While working, periodically write `{}` as `{{\"updatedAt\": \"<RFC3339>\", \"currentTaskId\": \"{}\"}}`.",
        paths.heartbeat(worker_name).display(),
        task.id
    );
    let _ = writeln!(
        out,
        "- When finished, write `{}` as `{{\"taskId\": \"{}\", \"status\": \"completed\" | \"failed\", \"summary\": \"<one line>\", \"completedAt\": \"<RFC3339>\"}}`.",
        paths.done(worker_name).display(),
        task.id
    );
    let _ = writeln!(
        out,
        "- If `{}` appears, stop and write `{}`.",
        paths.team().file_path(crate::paths::SHUTDOWN_FILE).display(),
        paths.shutdown_ack(worker_name).display()
    );
    out
}

/// Write the initial inbox, replacing any previous one
pub fn write_inbox(paths: &TeamPaths, team_name: &str, worker_name: &str, task: &TeamTask) -> Result<()> {
    paths
        .worker(worker_name)
        .save_text(INBOX_FILE, &render_inbox(paths, team_name, worker_name, task))
}

/// Append an explicit assignment notice
pub fn append_assignment(paths: &TeamPaths, worker_name: &str, task: &TeamTask) -> Result<()> {
    let store = paths.worker(worker_name);
    let mut text = store.load_text(INBOX_FILE)?.unwrap_or_default();
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    let _ = writeln!(text);
    let _ = writeln!(
        text,
        "## Assignment ({}): task {}: {}",
        Utc::now().to_rfc3339(),
        task.id,
        task.subject
    );
    let _ = writeln!(text);
    if !task.description.trim().is_empty() {
        let _ = writeln!(text, "{}", task.description.trim_end());
        let _ = writeln!(text);
    }
    let _ = writeln!(
        text,
        "Write `{}` for task {} when finished.",
        paths.done(worker_name).display(),
        task.id
    );
    store.save_text(INBOX_FILE, &text)
}

/// Instruction passed at launch (prompt mode) or typed into the pane
pub fn initial_instruction(inbox: &Path) -> String {
    format!(
        "Read {} and execute the single task it describes. Write the done file it names, then exit.",
        inbox.display()
    )
}

/// Short trigger typed after an explicit assignment
pub fn assignment_trigger(task_id: &str, inbox: &Path) -> String {
    format!(
        "New assignment: task {}. Re-read {} and follow the latest Assignment section.",
        task_id,
        inbox.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;
    use tempfile::tempdir;

    #[test]
    fn test_inbox_names_task_and_done_file() {
        let dir = tempdir().unwrap();
        let paths = TeamPaths::new(dir.path(), "alpha");
        let task = TeamTask::new("2", &TaskSpec::new("Fix parser", "Handle empty input"));

        write_inbox(&paths, "alpha", "worker-1", &task).unwrap();
        let text = std::fs::read_to_string(paths.inbox("worker-1")).unwrap();

        assert!(text.contains("## Task 2: Fix parser"));
        assert!(text.contains("Handle empty input"));
        assert!(text.contains(&paths.done("worker-1").display().to_string()));
        assert!(text.contains("Execute ONLY task 2"));
    }

    #[test]
    fn test_append_assignment_keeps_history() {
        let dir = tempdir().unwrap();
        let paths = TeamPaths::new(dir.path(), "alpha");
        let first = TeamTask::new("1", &TaskSpec::new("One", ""));
        let second = TeamTask::new("3", &TaskSpec::new("Three", "more"));

        write_inbox(&paths, "alpha", "worker-1", &first).unwrap();
        append_assignment(&paths, "worker-1", &second).unwrap();

        let text = std::fs::read_to_string(paths.inbox("worker-1")).unwrap();
        assert!(text.contains("## Task 1: One"));
        assert!(text.contains("task 3: Three"));
    }

    #[test]
    fn test_instruction_mentions_inbox() {
        let inbox = Path::new("/s/workers/worker-1/inbox.md");
        assert!(initial_instruction(inbox).contains("/s/workers/worker-1/inbox.md"));
        assert!(assignment_trigger("4", inbox).contains("task 4"));
    }
}
