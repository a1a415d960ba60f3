//! # team-runtime
//!
//! Team orchestration runtime for omc-team.
//! Distributes a fixed pool of tasks across worker processes, each running in
//! its own terminal pane, coordinating only through files under
//! `<cwd>/.omc/state/team/<team>/` and keystrokes sent to panes.
//!
//! ## Features
//!
//! - Per-task file locks with compare-and-swap claims
//! - Spawn protocol with prompt-mode and interactive delivery
//! - Watchdog reconciling done signals, pane liveness and heartbeats
//! - All-or-nothing explicit assignment
//! - Shutdown with optional ack polling, and resume after restart

pub mod agent;
pub mod assign;
pub mod bootstrap;
pub mod paths;
pub mod resume;
pub mod runtime;
pub mod shutdown;
pub mod signals;
pub mod spawn;
pub mod state;
pub mod status;
pub mod store;
pub mod task;
pub mod tracking;
pub mod watchdog;

// Runtime
pub use runtime::{ActiveWorker, RuntimeContext, TeamConfig, TeamRuntime, TeamSpec, WorkerTable};
pub use watchdog::TickReport;

// Tasks
pub use state::TaskStatus;
pub use store::{TaskCounts, TaskStore, Transition};
pub use task::{TaskSnapshot, TaskSpec, TeamTask};

// Agents and protocol files
pub use agent::{AgentKind, Delivery};
pub use paths::TeamPaths;
pub use signals::{DoneSignal, DoneStatus, Heartbeat, ShutdownAck, ShutdownRequest, WatchdogFailure};

// Operations without a live runtime
pub use assign::{assign_task, Assignment};
pub use shutdown::{shutdown_team, ShutdownReport};
pub use status::{read_team_status, TeamPhase, TeamStatus, WorkerStatus};
