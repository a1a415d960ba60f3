//! Agent types
//!
//! Each worker runs one agent CLI. The kind decides how the task instruction
//! reaches it: prompt-mode CLIs take it as a launch argument, interactive
//! CLIs get it typed into the pane after a warm-up.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::path::Path;
use std::str::FromStr;
use team_foundation::RuntimeSettings;
use team_pane::LaunchSpec;

/// How the instruction is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Passed on the command line, no further interaction
    Prompt,

    /// Typed into the pane after launch
    Interactive,
}

/// Worker agent CLI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    /// Any other binary; assumed to follow the shutdown-ack protocol
    Custom(String),
}

impl AgentKind {
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        match name.to_ascii_lowercase().as_str() {
            "claude" => AgentKind::Claude,
            "codex" => AgentKind::Codex,
            "gemini" => AgentKind::Gemini,
            _ => AgentKind::Custom(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
            AgentKind::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, AgentKind::Custom(_))
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            AgentKind::Codex | AgentKind::Gemini => Delivery::Prompt,
            AgentKind::Claude | AgentKind::Custom(_) => Delivery::Interactive,
        }
    }

    /// Key that dismisses the CLI's workspace-trust prompt
    pub fn trust_key(&self) -> Option<&'static str> {
        match self {
            AgentKind::Claude => Some("Enter"),
            _ => None,
        }
    }

    /// Built-in CLIs never write `shutdown-ack.json`
    pub fn writes_shutdown_ack(&self) -> bool {
        !self.is_builtin()
    }

    /// Binary to run, honouring `agentCommands` overrides
    pub fn binary<'a>(&'a self, settings: &'a RuntimeSettings) -> &'a str {
        settings
            .agent_command(self.as_str())
            .unwrap_or_else(|| self.as_str())
    }

    /// Launch command for a worker. `instruction` is only used by prompt-mode
    /// kinds.
    pub fn launch_spec(
        &self,
        settings: &RuntimeSettings,
        cwd: &Path,
        instruction: &str,
    ) -> LaunchSpec {
        let spec = LaunchSpec::new(self.binary(settings), cwd);
        match self {
            AgentKind::Codex => spec.arg("exec").arg("--full-auto").arg(instruction),
            AgentKind::Gemini => spec.arg("--yolo").arg("--prompt").arg(instruction),
            AgentKind::Claude | AgentKind::Custom(_) => spec,
        }
    }
}

impl FromStr for AgentKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AgentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AgentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Agent kind of the k-th worker (1-based), cycling through `agent_types`
pub fn agent_for_worker(agent_types: &[AgentKind], index: usize) -> Option<&AgentKind> {
    if agent_types.is_empty() {
        return None;
    }
    agent_types.get((index.max(1) - 1) % agent_types.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        assert_eq!(AgentKind::parse("Claude"), AgentKind::Claude);
        assert_eq!(
            AgentKind::parse("my-agent"),
            AgentKind::Custom("my-agent".into())
        );

        let json = serde_json::to_string(&vec![AgentKind::Codex, AgentKind::Custom("x".into())])
            .unwrap();
        assert_eq!(json, r#"["codex","x"]"#);
        let back: Vec<AgentKind> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0], AgentKind::Codex);
    }

    #[test]
    fn test_delivery_and_ack_protocol() {
        assert_eq!(AgentKind::Claude.delivery(), Delivery::Interactive);
        assert_eq!(AgentKind::Gemini.delivery(), Delivery::Prompt);
        assert!(!AgentKind::Claude.writes_shutdown_ack());
        assert!(AgentKind::Custom("bot".into()).writes_shutdown_ack());
        assert_eq!(AgentKind::Claude.trust_key(), Some("Enter"));
        assert_eq!(AgentKind::Codex.trust_key(), None);
    }

    #[test]
    fn test_prompt_mode_carries_instruction() {
        let settings = RuntimeSettings::default();
        let spec = AgentKind::Codex.launch_spec(&settings, Path::new("/w"), "Read inbox.md");
        assert_eq!(spec.program, "codex");
        assert_eq!(spec.args.last().map(String::as_str), Some("Read inbox.md"));

        let interactive = AgentKind::Claude.launch_spec(&settings, Path::new("/w"), "ignored");
        assert!(interactive.args.is_empty());
    }

    #[test]
    fn test_binary_override() {
        let mut settings = RuntimeSettings::default();
        settings
            .agent_commands
            .insert("gemini".into(), "/opt/bin/gemini-cli".into());
        assert_eq!(AgentKind::Gemini.binary(&settings), "/opt/bin/gemini-cli");
        assert_eq!(AgentKind::Claude.binary(&settings), "claude");
    }

    #[test]
    fn test_round_robin_assignment() {
        let types = vec![AgentKind::Claude, AgentKind::Codex];
        assert_eq!(agent_for_worker(&types, 1), Some(&AgentKind::Claude));
        assert_eq!(agent_for_worker(&types, 2), Some(&AgentKind::Codex));
        assert_eq!(agent_for_worker(&types, 3), Some(&AgentKind::Claude));
        assert_eq!(agent_for_worker(&[], 1), None);
    }
}
