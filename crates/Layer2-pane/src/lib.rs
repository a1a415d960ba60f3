//! # team-pane
//!
//! Terminal pane management for omc-team.
//!
//! Every worker runs in its own pane of a multiplexed terminal session.
//! The runtime only ever talks to panes through [`PaneManager`]:
//!
//! - `TmuxPaneManager` - production backend driving the `tmux` binary
//! - `MockPaneManager` - in-memory backend with failure injection, for tests

pub mod manager;
pub mod mock;
pub mod tmux;

pub use manager::{LaunchSpec, PaneManager, SessionLayout};
pub use mock::{MockPane, MockPaneManager};
pub use tmux::{TmuxCommand, TmuxPaneManager, SESSION_PREFIX};
