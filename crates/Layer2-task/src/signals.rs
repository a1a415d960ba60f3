//! Files exchanged with workers and pollers
//!
//! Workers write `heartbeat.json`, `done.json` and (ack-protocol workers only)
//! `shutdown-ack.json`. The orchestrator writes `shutdown.json` and, on fatal
//! watchdog escalation, `watchdog-failed.json`.

use crate::paths::{DONE_FILE, HEARTBEAT_FILE};
use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use team_foundation::{JsonStore, Result};

/// Liveness record rewritten periodically by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
}

impl Heartbeat {
    pub fn now(task_id: impl Into<String>) -> Self {
        Self {
            updated_at: Utc::now(),
            current_task_id: Some(task_id.into()),
        }
    }
}

/// Outcome reported in a done signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneStatus {
    Completed,
    Failed,
}

impl From<DoneStatus> for TaskStatus {
    fn from(status: DoneStatus) -> Self {
        match status {
            DoneStatus::Completed => TaskStatus::Completed,
            DoneStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// Completion marker written by a worker, consumed by the watchdog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneSignal {
    pub task_id: String,
    pub status: DoneStatus,

    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Optional longer output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl DoneSignal {
    pub fn completed(task_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: DoneStatus::Completed,
            summary: summary.into(),
            completed_at: Some(Utc::now()),
            result: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            status: DoneStatus::Failed,
            ..Self::completed(task_id, summary)
        }
    }
}

/// What was found in a worker's done file
#[derive(Debug, Clone, PartialEq)]
pub enum DoneRead {
    Absent,
    Signal(DoneSignal),
    /// Present but unparseable; carries the parse error
    Malformed(String),
}

/// Marker asking workers to wind down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownRequest {
    pub requested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Written by ack-protocol workers on graceful exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownAck {
    #[serde(default)]
    pub acked_at: Option<DateTime<Utc>>,
}

/// Fatal watchdog marker; terminal until the team is torn down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogFailure {
    pub failed_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_error: String,
}

/// Read `done.json` from a worker directory
pub fn read_done(worker_dir: &JsonStore) -> Result<DoneRead> {
    let Some(text) = worker_dir.load_text(DONE_FILE)? else {
        return Ok(DoneRead::Absent);
    };
    Ok(match serde_json::from_str::<DoneSignal>(&text) {
        Ok(signal) => DoneRead::Signal(signal),
        Err(e) => DoneRead::Malformed(e.to_string()),
    })
}

/// Read `heartbeat.json`; unreadable heartbeats count as missing
pub fn read_heartbeat(worker_dir: &JsonStore) -> Option<Heartbeat> {
    worker_dir.load_optional(HEARTBEAT_FILE).ok().flatten()
}
