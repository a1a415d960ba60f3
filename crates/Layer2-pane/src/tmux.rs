//! Tmux pane backend
//!
//! `TmuxCommand` builds argument vectors without executing anything, so the
//! command shapes are unit-testable. `TmuxPaneManager` runs them through
//! `tokio::process::Command`.
//!
//! Session ownership: a session created here is named `omc-team-<team>` and is
//! killed whole on teardown. When the runtime is started from inside tmux the
//! caller's own window is adopted instead, and teardown only kills the worker
//! panes it was given.

use crate::manager::{LaunchSpec, PaneManager, SessionLayout};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use team_foundation::{Error, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefix of sessions owned by the runtime
pub const SESSION_PREFIX: &str = "omc-team-";

/// Layout applied after every split
const WORKER_LAYOUT: &str = "main-vertical";

// ============================================================================
// Command builder
// ============================================================================

/// Builds tmux argument vectors
pub struct TmuxCommand;

impl TmuxCommand {
    /// `tmux new-session -d -s <name> -c <cwd> -P -F '#{pane_id}'`
    pub fn new_session(name: &str, cwd: &Path) -> Vec<String> {
        args(&[
            "new-session",
            "-d",
            "-s",
            name,
            "-c",
            &cwd.to_string_lossy(),
            "-P",
            "-F",
            "#{pane_id}",
        ])
    }

    /// `tmux display-message -p -t <pane> '#{session_name}:#{window_index}'`
    pub fn window_of(pane_id: &str) -> Vec<String> {
        args(&[
            "display-message",
            "-p",
            "-t",
            pane_id,
            "#{session_name}:#{window_index}",
        ])
    }

    /// `tmux split-window -h -d -t <target> -c <cwd> -P -F '#{pane_id}'`
    pub fn split_window(target: &str, cwd: &Path) -> Vec<String> {
        args(&[
            "split-window",
            "-h",
            "-d",
            "-t",
            target,
            "-c",
            &cwd.to_string_lossy(),
            "-P",
            "-F",
            "#{pane_id}",
        ])
    }

    /// `tmux select-layout -t <target> <layout>`
    pub fn select_layout(target: &str, layout: &str) -> Vec<String> {
        args(&["select-layout", "-t", target, layout])
    }

    /// `tmux respawn-pane -k -t <pane> -c <cwd> <command>`
    pub fn respawn_pane(pane_id: &str, cwd: &Path, command: &str) -> Vec<String> {
        args(&[
            "respawn-pane",
            "-k",
            "-t",
            pane_id,
            "-c",
            &cwd.to_string_lossy(),
            command,
        ])
    }

    /// `tmux send-keys -t <pane> -l <text>`
    pub fn send_literal(pane_id: &str, text: &str) -> Vec<String> {
        args(&["send-keys", "-t", pane_id, "-l", text])
    }

    /// `tmux send-keys -t <pane> <key>`
    pub fn send_key(pane_id: &str, key: &str) -> Vec<String> {
        args(&["send-keys", "-t", pane_id, key])
    }

    /// `tmux display-message -p -t <pane> '#{pane_dead}'`
    pub fn pane_dead(pane_id: &str) -> Vec<String> {
        args(&["display-message", "-p", "-t", pane_id, "#{pane_dead}"])
    }

    /// `tmux display-message -p -t <target> '#{session_name}'`
    pub fn probe_session(target: &str) -> Vec<String> {
        args(&["display-message", "-p", "-t", target, "#{session_name}"])
    }

    /// `tmux list-panes -t <target> -F '#{pane_id}'`
    pub fn list_panes(target: &str) -> Vec<String> {
        args(&["list-panes", "-t", target, "-F", "#{pane_id}"])
    }

    /// `tmux kill-pane -t <pane>`
    pub fn kill_pane(pane_id: &str) -> Vec<String> {
        args(&["kill-pane", "-t", pane_id])
    }

    /// `tmux kill-session -t <name>`
    pub fn kill_session(name: &str) -> Vec<String> {
        args(&["kill-session", "-t", name])
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Session name for a team-owned session
pub fn session_name_for(team_name: &str) -> String {
    format!("{}{}", SESSION_PREFIX, team_name)
}

// ============================================================================
// Tmux pane manager
// ============================================================================

/// Pane manager backed by the `tmux` binary
#[derive(Debug, Clone)]
pub struct TmuxPaneManager {
    binary: PathBuf,
}

impl TmuxPaneManager {
    pub fn new() -> Self {
        Self {
            binary: which::which("tmux").unwrap_or_else(|_| PathBuf::from("tmux")),
        }
    }

    /// Use a specific tmux binary
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run tmux and return trimmed stdout
    async fn run(&self, args: Vec<String>) -> Result<String> {
        let op = args.first().cloned().unwrap_or_default();
        debug!("tmux {}", args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::pane(&op, format!("failed to spawn tmux: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(Error::pane(
                &op,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Pane hosting the caller, when running inside tmux
    fn current_pane() -> Option<String> {
        std::env::var("TMUX").ok()?;
        std::env::var("TMUX_PANE").ok().filter(|p| !p.is_empty())
    }
}

impl Default for TmuxPaneManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaneManager for TmuxPaneManager {
    async fn create_session(
        &self,
        team_name: &str,
        initial_pane_count: usize,
        cwd: &Path,
    ) -> Result<SessionLayout> {
        let (session_name, leader_pane_id) = match Self::current_pane() {
            Some(pane) => {
                let window = self.run(TmuxCommand::window_of(&pane)).await?;
                debug!(window = %window, leader = %pane, "Adopting current tmux window");
                (window, pane)
            }
            None => {
                let name = session_name_for(team_name);
                let leader = self.run(TmuxCommand::new_session(&name, cwd)).await?;
                (name, leader)
            }
        };

        let mut worker_pane_ids = Vec::with_capacity(initial_pane_count);
        for _ in 0..initial_pane_count {
            let target = worker_pane_ids.last().unwrap_or(&leader_pane_id).clone();
            let pane = self.split_pane(&target, cwd).await?;
            worker_pane_ids.push(pane);
        }
        if initial_pane_count > 0 {
            self.normalize_layout(&session_name).await?;
        }

        Ok(SessionLayout {
            session_name,
            leader_pane_id,
            worker_pane_ids,
        })
    }

    async fn split_pane(&self, target: &str, cwd: &Path) -> Result<String> {
        let pane = self.run(TmuxCommand::split_window(target, cwd)).await?;
        if pane.is_empty() {
            return Err(Error::pane("split-window", "tmux returned no pane id"));
        }
        Ok(pane)
    }

    async fn normalize_layout(&self, session_name: &str) -> Result<()> {
        self.run(TmuxCommand::select_layout(session_name, WORKER_LAYOUT))
            .await
            .map(|_| ())
    }

    async fn launch(&self, pane_id: &str, spec: &LaunchSpec) -> Result<()> {
        let command = spec.shell_command()?;
        self.run(TmuxCommand::respawn_pane(pane_id, &spec.cwd, &command))
            .await
            .map(|_| ())
    }

    async fn send_text(&self, _session_name: &str, pane_id: &str, text: &str) -> bool {
        if let Err(e) = self.run(TmuxCommand::send_literal(pane_id, text)).await {
            debug!(pane = %pane_id, "send-keys failed: {}", e);
            return false;
        }
        self.send_key(pane_id, "Enter").await
    }

    async fn send_key(&self, pane_id: &str, key: &str) -> bool {
        match self.run(TmuxCommand::send_key(pane_id, key)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(pane = %pane_id, key = %key, "send-keys failed: {}", e);
                false
            }
        }
    }

    async fn is_alive(&self, pane_id: &str) -> bool {
        matches!(
            self.run(TmuxCommand::pane_dead(pane_id)).await.as_deref(),
            Ok("0")
        )
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<()> {
        match self.run(TmuxCommand::kill_pane(pane_id)).await {
            Ok(_) => Ok(()),
            Err(Error::PaneCommand { message, .. }) if is_missing_target(&message) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn kill_session(
        &self,
        session_name: &str,
        pane_ids: &[String],
        leader_pane_id: &str,
    ) -> Result<()> {
        if session_name.starts_with(SESSION_PREFIX) {
            return match self.run(TmuxCommand::kill_session(session_name)).await {
                Ok(_) => Ok(()),
                Err(Error::PaneCommand { message, .. }) if is_missing_target(&message) => Ok(()),
                Err(e) => Err(e),
            };
        }

        // Adopted window: only our worker panes go
        let mut last_err = None;
        for pane in pane_ids.iter().filter(|p| p.as_str() != leader_pane_id) {
            if let Err(e) = self.kill_pane(pane).await {
                warn!(pane = %pane, "Failed to kill worker pane: {}", e);
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn session_exists(&self, session_name: &str) -> bool {
        self.run(TmuxCommand::probe_session(session_name))
            .await
            .is_ok()
    }

    async fn list_panes(&self, session_name: &str) -> Result<Vec<String>> {
        let output = self.run(TmuxCommand::list_panes(session_name)).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn is_available(&self) -> bool {
        self.binary.is_file() || which::which(&self.binary).is_ok()
    }

    fn name(&self) -> &'static str {
        "tmux"
    }
}

fn is_missing_target(message: &str) -> bool {
    message.contains("can't find") || message.contains("no such") || message.contains("not found")
}
