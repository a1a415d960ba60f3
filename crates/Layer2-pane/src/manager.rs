//! Pane manager trait

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use team_foundation::{Error, Result};

/// Session created (or adopted) for a team
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    /// Target used for session-wide operations
    pub session_name: String,

    /// Pane of the supervising process; never killed by the runtime
    pub leader_pane_id: String,

    /// Panes split during creation, in order
    pub worker_pane_ids: Vec<String>,
}

/// Command a worker pane is started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Binary to run
    pub program: String,

    /// Arguments
    pub args: Vec<String>,

    /// Environment scoped to this worker
    pub env: Vec<(String, String)>,

    /// Working directory
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Environment value by key
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render as a single shell command: `env K=V ... program args...`
    pub fn shell_command(&self) -> Result<String> {
        let mut words: Vec<String> = Vec::with_capacity(self.env.len() + self.args.len() + 2);
        if !self.env.is_empty() {
            words.push("env".to_string());
            for (key, value) in &self.env {
                words.push(format!("{}={}", key, value));
            }
        }
        words.push(self.program.clone());
        words.extend(self.args.iter().cloned());

        shlex::try_join(words.iter().map(|w| w.as_str()))
            .map_err(|e| Error::InvalidInput(format!("Cannot quote launch command: {}", e)))
    }
}

/// Pane manager - implement to add a new terminal backend.
///
/// Every call is an external-process round trip. `send_text`/`send_key` are
/// best-effort and report success as a bool; callers own the retry policy.
#[async_trait]
pub trait PaneManager: Send + Sync {
    /// Create (or adopt) the session for a team, splitting `initial_pane_count`
    /// worker panes off the leader.
    async fn create_session(
        &self,
        team_name: &str,
        initial_pane_count: usize,
        cwd: &Path,
    ) -> Result<SessionLayout>;

    /// Split a new pane off `target`, returning its id
    async fn split_pane(&self, target: &str, cwd: &Path) -> Result<String>;

    /// Re-tile the session after a topology change
    async fn normalize_layout(&self, session_name: &str) -> Result<()>;

    /// Start a worker process in a pane
    async fn launch(&self, pane_id: &str, spec: &LaunchSpec) -> Result<()>;

    /// Type text into a pane and submit it
    async fn send_text(&self, session_name: &str, pane_id: &str, text: &str) -> bool;

    /// Send a single named key (e.g. `Enter`)
    async fn send_key(&self, pane_id: &str, key: &str) -> bool;

    /// Whether the pane exists and its process is still running
    async fn is_alive(&self, pane_id: &str) -> bool;

    /// Kill one pane; killing an already-gone pane is not an error
    async fn kill_pane(&self, pane_id: &str) -> Result<()>;

    /// Tear down a team's panes. The leader pane is never killed.
    async fn kill_session(
        &self,
        session_name: &str,
        pane_ids: &[String],
        leader_pane_id: &str,
    ) -> Result<()>;

    /// Whether the session still exists
    async fn session_exists(&self, session_name: &str) -> bool;

    /// Live pane ids of a session in pane order (leader first)
    async fn list_panes(&self, session_name: &str) -> Result<Vec<String>>;

    /// Check if the backend is usable on this machine
    fn is_available(&self) -> bool;

    /// Get backend name
    fn name(&self) -> &'static str;
}
