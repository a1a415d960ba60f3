//! Task definition and types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task as given at team creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub subject: String,

    #[serde(default)]
    pub description: String,
}

impl TaskSpec {
    pub fn new(subject: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            description: description.into(),
        }
    }
}

/// One task file (`tasks/<id>.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTask {
    /// Task identifier ("1".."n")
    pub id: String,

    pub subject: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// Worker name while claimed
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Free-form output reported by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Human readable outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Fields restored by a rollback
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl TeamTask {
    /// Create a pending task
    pub fn new(id: impl Into<String>, spec: &TaskSpec) -> Self {
        Self {
            id: id.into(),
            subject: spec.subject.clone(),
            description: spec.description.clone(),
            status: TaskStatus::Pending,
            owner: None,
            assigned_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            summary: None,
        }
    }

    /// Pending -> in_progress. Returns false (unchanged) for any other state.
    pub fn claim(&mut self, owner: &str, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(TaskStatus::InProgress) {
            return false;
        }
        self.status = TaskStatus::InProgress;
        self.owner = Some(owner.to_string());
        self.assigned_at = Some(now);
        true
    }

    /// In_progress -> completed/failed. Terminal timestamps are written once.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        summary: impl Into<String>,
        result: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if !status.is_terminal() || !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        self.summary = Some(summary.into());
        if result.is_some() {
            self.result = result;
        }
        match status {
            TaskStatus::Completed => self.completed_at = Some(now),
            _ => self.failed_at = Some(now),
        }
        true
    }

    /// Undo a claim held by `owner`
    pub fn release(&mut self, owner: &str) -> bool {
        if !self.status.is_in_progress() || self.owner.as_deref() != Some(owner) {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.owner = None;
        self.assigned_at = None;
        true
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            status: self.status,
            owner: self.owner.clone(),
            assigned_at: self.assigned_at,
        }
    }

    pub fn restore(&mut self, snapshot: &TaskSnapshot) {
        self.status = snapshot.status;
        self.owner = snapshot.owner.clone();
        self.assigned_at = snapshot.assigned_at;
    }
}

/// Order task ids numerically where possible ("2" < "10")
pub fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
