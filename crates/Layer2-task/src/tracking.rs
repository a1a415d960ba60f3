//! Pane tracking file
//!
//! Lets unrelated tooling discover a team's panes. Enabled only when both
//! `OMC_PANE_TRACKING_DIR` and `OMC_PANE_TRACKING_ID` are set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use team_foundation::{Error, JsonStore, Result};

pub const TRACKING_DIR_ENV: &str = "OMC_PANE_TRACKING_DIR";
pub const TRACKING_ID_ENV: &str = "OMC_PANE_TRACKING_ID";

/// Contents of `team-panes-<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneTracking {
    pub pane_ids: Vec<String>,
    pub leader_pane_id: String,
}

/// Tracking path from the process environment
pub fn tracking_path_from_env() -> Option<PathBuf> {
    tracking_path(|key| std::env::var(key).ok())
}

/// Tracking path from an arbitrary variable lookup
pub fn tracking_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let dir = lookup(TRACKING_DIR_ENV).filter(|v| !v.trim().is_empty())?;
    let id = lookup(TRACKING_ID_ENV).filter(|v| !v.trim().is_empty())?;
    Some(PathBuf::from(dir).join(format!("team-panes-{}.json", id.trim())))
}

/// Atomic write (temp file + rename)
pub fn write_tracking(path: &Path, tracking: &PaneTracking) -> Result<()> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str())) else {
        return Err(Error::InvalidInput(format!(
            "Invalid tracking path: {}",
            path.display()
        )));
    };
    JsonStore::new(dir).save(name, tracking)
}
