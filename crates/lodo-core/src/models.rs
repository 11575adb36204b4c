//! Data models for lodo
//!
//! Defines the core data structures: Task and the outbox entry that
//! records each pending mutation until it has been delivered remotely.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque task identifier.
///
/// Ids are creation-ordered: they are derived from the Unix-millisecond
/// clock and bumped past the last issued id, so two tasks created in the
/// same millisecond still compare in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TaskId)
    }
}

/// Whether a task's latest state has been acknowledged by the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not yet delivered
    Pending,
    /// Latest version acknowledged remotely
    Synced,
    /// Delivery gave up after exhausting retries
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// A single user-visible to-do item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique, creation-ordered identifier
    pub id: TaskId,
    /// Task text (never empty)
    pub text: String,
    /// When this task was created
    pub created_at: DateTime<Utc>,
    /// When this task was last saved
    pub updated_at: DateTime<Utc>,
    /// Remote acknowledgement state
    pub sync_status: SyncStatus,
    /// Bumped on every save; strictly increasing per task
    pub version: i64,
}

/// Input to [`Store::save_task`](crate::Store::save_task)
///
/// An absent id means "create"; a present id means "update" (upsert if the
/// task no longer exists locally).
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub id: Option<TaskId>,
    pub text: String,
}

impl TaskInput {
    /// Input for creating a new task
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
        }
    }

    /// Input for updating an existing task
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }
}

/// The mutation an outbox entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(format!("unknown outbox action '{}'", other)),
        }
    }
}

/// Delivery state of an outbox entry
///
/// Transitions: `Pending -> Delivered` (success, terminal),
/// `Pending -> Pending` (retry, bumps `retry_count`),
/// `Pending -> Failed` (retries exhausted, terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Delivered,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Delivered => "delivered",
            EntryStatus::Failed => "failed",
        }
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "delivered" => Ok(EntryStatus::Delivered),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(format!("unknown entry status '{}'", other)),
        }
    }
}

/// A queued mutation awaiting delivery to the remote system
///
/// Entries are immutable once written except for `status` and
/// `retry_count`. `task_id` is a reference, not ownership: the task may
/// already be gone by the time a delete entry is delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    /// Auto-assigned sequence id (delivery order tiebreak)
    pub id: i64,
    /// The mutation kind
    pub action: Action,
    /// The task this entry refers to
    pub task_id: TaskId,
    /// Snapshot of the task at mutation time; `None` for deletes
    pub task_data: Option<Task>,
    /// Delivery state
    pub status: EntryStatus,
    /// When this entry was queued
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display_and_parse() {
        let id = TaskId(1700000000123);
        assert_eq!(id.to_string(), "1700000000123");
        assert_eq!("1700000000123".parse::<TaskId>().unwrap(), id);
        assert!("not-a-number".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_task_id_is_creation_ordered() {
        assert!(TaskId(1) < TaskId(2));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        for status in [
            EntryStatus::Pending,
            EntryStatus::Delivered,
            EntryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        for action in [Action::Create, Action::Update, Action::Delete] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_task_input_builder() {
        let input = TaskInput::new("buy milk");
        assert!(input.id.is_none());

        let input = input.with_id(TaskId(42));
        assert_eq!(input.id, Some(TaskId(42)));
        assert_eq!(input.text, "buy milk");
    }
}
