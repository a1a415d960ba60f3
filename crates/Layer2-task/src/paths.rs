//! On-disk layout of a team
//!
//! ```text
//! <cwd>/.omc/state/team/<team>/
//!   config.json  workers.json  shutdown.json  watchdog-failed.json
//!   tasks/<id>.json  tasks/<id>.lock
//!   workers/<name>/{inbox.md, done.json, heartbeat.json, shutdown-ack.json}
//! ```

use std::path::{Path, PathBuf};
use team_foundation::{Error, JsonStore, Result};

/// Team directories, relative to the project root
pub const STATE_ROOT: &str = ".omc/state/team";

pub const CONFIG_FILE: &str = "config.json";
pub const WORKERS_FILE: &str = "workers.json";
pub const SHUTDOWN_FILE: &str = "shutdown.json";
pub const WATCHDOG_FAILED_FILE: &str = "watchdog-failed.json";

pub const INBOX_FILE: &str = "inbox.md";
pub const DONE_FILE: &str = "done.json";
pub const HEARTBEAT_FILE: &str = "heartbeat.json";
pub const SHUTDOWN_ACK_FILE: &str = "shutdown-ack.json";

const MAX_TEAM_NAME: usize = 50;

/// Paths of one team's state directory
#[derive(Debug, Clone)]
pub struct TeamPaths {
    root: PathBuf,
}

impl TeamPaths {
    pub fn new(cwd: &Path, team_name: &str) -> Self {
        Self {
            root: cwd.join(STATE_ROOT).join(team_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store rooted at the team directory
    pub fn team(&self) -> JsonStore {
        JsonStore::new(&self.root)
    }

    pub fn tasks(&self) -> JsonStore {
        JsonStore::new(self.root.join("tasks"))
    }

    pub fn worker(&self, worker_name: &str) -> JsonStore {
        JsonStore::new(self.root.join("workers").join(worker_name))
    }

    pub fn task_file_name(task_id: &str) -> String {
        format!("{}.json", task_id)
    }

    pub fn task_lock(&self, task_id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{}.lock", task_id))
    }

    pub fn inbox(&self, worker_name: &str) -> PathBuf {
        self.worker(worker_name).file_path(INBOX_FILE)
    }

    pub fn done(&self, worker_name: &str) -> PathBuf {
        self.worker(worker_name).file_path(DONE_FILE)
    }

    pub fn heartbeat(&self, worker_name: &str) -> PathBuf {
        self.worker(worker_name).file_path(HEARTBEAT_FILE)
    }

    pub fn shutdown_ack(&self, worker_name: &str) -> PathBuf {
        self.worker(worker_name).file_path(SHUTDOWN_ACK_FILE)
    }
}

/// Team names become directory and session names
pub fn validate_team_name(name: &str) -> Result<()> {
    let starts_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    if !starts_ok
        || name.len() > MAX_TEAM_NAME
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(format!(
            "Invalid team name '{}': use 1-{} characters from [A-Za-z0-9_-], starting with a letter or digit",
            name, MAX_TEAM_NAME
        )));
    }
    Ok(())
}

/// Worker name for the k-th spawned worker (1-based)
pub fn worker_name(index: usize) -> String {
    format!("worker-{}", index)
}

/// Inverse of [`worker_name`]
pub fn worker_index(name: &str) -> Option<usize> {
    name.strip_prefix("worker-")?
        .parse()
        .ok()
        .filter(|n| *n > 0)
}
