//! Durable store for tasks and the outbox queue
//!
//! The `Store` exclusively owns both collections. Every task mutation
//! writes the task row and appends the matching outbox entry inside one
//! SQLite transaction, so a task change without a queue entry (or the
//! reverse) is never observable.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open(config)?;
//!
//! let task = store.save_task(TaskInput::new("buy milk"))?;
//! let tasks = store.get_all_tasks()?;
//! store.delete_task(task.id)?;
//! ```
//!
//! The store is internally synchronized and shareable behind an `Arc`;
//! the underlying transactional storage serializes conflicting writes, so
//! mutations to the same task apply in the order their calls reach the
//! connection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::models::{Action, EntryStatus, OutboxEntry, SyncStatus, Task, TaskId, TaskInput};
use crate::storage::init_schema;
use crate::wake::{NoopWake, WakeRegistrar, SYNC_WAKE_TAG};

/// Per-status outbox row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Durable store for tasks and pending mutations
pub struct Store {
    conn: Mutex<Connection>,
    config: Config,
    wake: Arc<dyn WakeRegistrar>,
    /// Highest task id issued so far; ids stay strictly increasing even
    /// for multiple creates within one millisecond
    last_id: AtomicI64,
    persistent: bool,
}

impl Store {
    /// Open the on-disk store, creating the schema if needed
    ///
    /// Idempotent: opening an existing database re-runs the (idempotent)
    /// schema init and preserves all rows. Fails with
    /// [`StoreError::Unavailable`] if the database cannot be opened.
    pub fn open(config: Config) -> StoreResult<Self> {
        Self::open_with_wake(config, Arc::new(NoopWake))
    }

    /// Open the on-disk store with a background wake-up registrar
    pub fn open_with_wake(config: Config, wake: Arc<dyn WakeRegistrar>) -> StoreResult<Self> {
        let path = config.sqlite_path();
        let conn = Connection::open(&path).map_err(|e| StoreError::Unavailable {
            details: format!("cannot open {:?}: {}", path, e),
        })?;
        Self::from_connection(conn, config, wake, true)
    }

    /// Open an in-memory store (tests, explicit non-persistent use)
    pub fn in_memory(config: Config) -> StoreResult<Self> {
        Self::in_memory_with_wake(config, Arc::new(NoopWake))
    }

    /// Open an in-memory store with a background wake-up registrar
    pub fn in_memory_with_wake(
        config: Config,
        wake: Arc<dyn WakeRegistrar>,
    ) -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            details: format!("cannot open in-memory database: {}", e),
        })?;
        Self::from_connection(conn, config, wake, false)
    }

    /// Open the on-disk store, degrading to in-memory on failure
    ///
    /// Failure to open persistence is not fatal: the app keeps working
    /// without durability until restart. The fallback is logged.
    pub fn open_or_memory(config: Config, wake: Arc<dyn WakeRegistrar>) -> StoreResult<Self> {
        match Self::open_with_wake(config.clone(), Arc::clone(&wake)) {
            Ok(store) => Ok(store),
            Err(err) => {
                warn!(%err, "persistent storage unavailable, falling back to in-memory store");
                Self::in_memory_with_wake(config, wake)
            }
        }
    }

    fn from_connection(
        conn: Connection,
        config: Config,
        wake: Arc<dyn WakeRegistrar>,
        persistent: bool,
    ) -> StoreResult<Self> {
        init_schema(&conn).map_err(|e| StoreError::Unavailable {
            details: format!("schema init failed: {}", e),
        })?;

        // Resume id generation past anything already issued, including
        // ids that only survive in the outbox after a delete
        let last_id: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(id), 0) FROM (
                     SELECT id FROM tasks UNION ALL SELECT task_id AS id FROM outbox
                 )",
                [],
                |row| row.get(0),
            )
            .map_err(StoreError::Database)?;

        debug!(persistent, "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            config,
            wake,
            last_id: AtomicI64::new(last_id),
            persistent,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether this store writes to disk (false in degraded mode)
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Save a task: create when `input.id` is absent, update otherwise
    ///
    /// Bumps `version` and `updated_at`, resets `sync_status` to pending,
    /// and appends the matching outbox entry in the same transaction.
    /// Returns the persisted task. Registers a background wake-up as a
    /// fire-and-forget side effect.
    pub fn save_task(&self, input: TaskInput) -> StoreResult<Task> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(StoreError::EmptyText);
        }

        let now = Utc::now();
        let task = {
            let mut conn = self.conn.lock().expect("store connection poisoned");
            let tx = conn.transaction()?;

            let existing = match input.id {
                Some(id) => tx
                    .query_row(
                        "SELECT id, text, created_at, updated_at, sync_status, version
                         FROM tasks WHERE id = ?1",
                        [id.as_i64()],
                        task_from_row,
                    )
                    .optional()?,
                None => None,
            };

            let task = Task {
                id: input.id.unwrap_or_else(|| self.next_task_id(now)),
                text: text.to_string(),
                created_at: existing.as_ref().map(|t| t.created_at).unwrap_or(now),
                updated_at: now,
                sync_status: SyncStatus::Pending,
                version: existing.as_ref().map(|t| t.version + 1).unwrap_or(1),
            };

            tx.execute(
                "INSERT OR REPLACE INTO tasks (id, text, created_at, updated_at, sync_status, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.id.as_i64(),
                    task.text,
                    task.created_at.timestamp_millis(),
                    task.updated_at.timestamp_millis(),
                    task.sync_status.as_str(),
                    task.version,
                ],
            )?;

            // An explicit id means update, even when the row was gone
            let action = if input.id.is_some() {
                Action::Update
            } else {
                Action::Create
            };
            let snapshot = serde_json::to_string(&task)?;
            tx.execute(
                "INSERT INTO outbox (action, task_id, task_data, status, created_at, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    action.as_str(),
                    task.id.as_i64(),
                    snapshot,
                    EntryStatus::Pending.as_str(),
                    now.timestamp_millis(),
                ],
            )?;

            tx.commit()?;
            task
        };

        info!(id = %task.id, version = task.version, "task saved locally");
        self.register_wake();
        Ok(task)
    }

    /// Delete a task and queue the deletion for delivery
    ///
    /// Idempotent: deleting an id that no longer exists still succeeds and
    /// still queues the delete entry.
    pub fn delete_task(&self, id: TaskId) -> StoreResult<()> {
        {
            let mut conn = self.conn.lock().expect("store connection poisoned");
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM tasks WHERE id = ?1", [id.as_i64()])?;
            tx.execute(
                "INSERT INTO outbox (action, task_id, task_data, status, created_at, retry_count)
                 VALUES (?1, ?2, NULL, ?3, ?4, 0)",
                params![
                    Action::Delete.as_str(),
                    id.as_i64(),
                    EntryStatus::Pending.as_str(),
                    Utc::now().timestamp_millis(),
                ],
            )?;

            tx.commit()?;
        }

        info!(%id, "task queued for deletion");
        self.register_wake();
        Ok(())
    }

    /// Get a task by id
    pub fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let task = conn
            .query_row(
                "SELECT id, text, created_at, updated_at, sync_status, version
                 FROM tasks WHERE id = ?1",
                [id.as_i64()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Get all tasks, ordered by creation time ascending
    pub fn get_all_tasks(&self) -> StoreResult<Vec<Task>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, text, created_at, updated_at, sync_status, version
             FROM tasks ORDER BY created_at ASC, id ASC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Pending outbox entries, oldest first (delivery order)
    pub fn pending_entries(&self) -> StoreResult<Vec<OutboxEntry>> {
        self.entries_with_status(EntryStatus::Pending)
    }

    /// Failed outbox entries, oldest first
    ///
    /// These have exhausted their retries and are only retried again on
    /// explicit user action.
    pub fn failed_entries(&self) -> StoreResult<Vec<OutboxEntry>> {
        self.entries_with_status(EntryStatus::Failed)
    }

    fn entries_with_status(&self, status: EntryStatus) -> StoreResult<Vec<OutboxEntry>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, action, task_id, task_data, status, created_at, retry_count
             FROM outbox WHERE status = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let entries = stmt
            .query_map([status.as_str()], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Number of mutations still awaiting delivery
    pub fn pending_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE status = ?1",
            [EntryStatus::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of tasks
    pub fn task_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Outbox row counts by status
    pub fn outbox_stats(&self) -> StoreResult<OutboxStats> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM outbox GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = OutboxStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => stats.pending = count as usize,
                "delivered" => stats.delivered = count as usize,
                "failed" => stats.failed = count as usize,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Mark an entry delivered and its task synced, in one transaction
    ///
    /// The task update may touch zero rows (the task was deleted); that is
    /// fine, the entry status is what matters.
    pub fn mark_delivered(&self, entry_id: i64, task_id: TaskId) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("store connection poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE outbox SET status = ?1 WHERE id = ?2",
            params![EntryStatus::Delivered.as_str(), entry_id],
        )?;
        tx.execute(
            "UPDATE tasks SET sync_status = ?1 WHERE id = ?2",
            params![SyncStatus::Synced.as_str(), task_id.as_i64()],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Record a failed delivery attempt
    ///
    /// Bumps `retry_count`; when `exhausted`, the entry transitions to
    /// failed (terminal) and the task is marked with the error status so
    /// the UI can surface it. Returns the new retry count.
    pub fn record_failure(
        &self,
        entry_id: i64,
        task_id: TaskId,
        exhausted: bool,
    ) -> StoreResult<u32> {
        let mut conn = self.conn.lock().expect("store connection poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE outbox SET retry_count = retry_count + 1 WHERE id = ?1",
            [entry_id],
        )?;
        if exhausted {
            tx.execute(
                "UPDATE outbox SET status = ?1 WHERE id = ?2",
                params![EntryStatus::Failed.as_str(), entry_id],
            )?;
            tx.execute(
                "UPDATE tasks SET sync_status = ?1 WHERE id = ?2",
                params![SyncStatus::Error.as_str(), task_id.as_i64()],
            )?;
        }

        let retry_count: u32 = tx.query_row(
            "SELECT retry_count FROM outbox WHERE id = ?1",
            [entry_id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok(retry_count)
    }

    /// Remove delivered entries from the outbox
    pub fn prune_delivered(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let removed = conn.execute(
            "DELETE FROM outbox WHERE status = ?1",
            [EntryStatus::Delivered.as_str()],
        )?;
        Ok(removed)
    }

    /// Empty both collections (debug/reset, not normal operation)
    pub fn clear(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock().expect("store connection poisoned");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM tasks", [])?;
        tx.execute("DELETE FROM outbox", [])?;
        tx.commit()?;
        info!("database cleared");
        Ok(())
    }

    /// Strictly increasing, wall-clock-anchored id
    fn next_task_id(&self, now: DateTime<Utc>) -> TaskId {
        let now_ms = now.timestamp_millis();
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(last.max(now_ms - 1) + 1)
            })
            .unwrap_or(now_ms - 1);
        TaskId(prev.max(now_ms - 1) + 1)
    }

    /// Best-effort background-sync registration; never propagates
    fn register_wake(&self) {
        if let Err(err) = self.wake.register(SYNC_WAKE_TAG) {
            warn!(%err, "failed to register background sync");
        }
    }

    #[cfg(test)]
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn.lock().expect("store connection poisoned"))
    }
}

/// Lazily initialized, process-wide store handle
///
/// All callers of [`get`](StoreHandle::get) share one initialization: the
/// first call opens the store, concurrent calls await that same attempt.
pub struct StoreHandle {
    config: Config,
    wake: Arc<dyn WakeRegistrar>,
    cell: OnceCell<Arc<Store>>,
}

impl StoreHandle {
    pub fn new(config: Config) -> Self {
        Self::with_wake(config, Arc::new(NoopWake))
    }

    pub fn with_wake(config: Config, wake: Arc<dyn WakeRegistrar>) -> Self {
        Self {
            config,
            wake,
            cell: OnceCell::new(),
        }
    }

    /// Get the shared store, opening it on first use
    pub async fn get(&self) -> StoreResult<Arc<Store>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                Store::open_with_wake(self.config.clone(), Arc::clone(&self.wake)).map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(store))
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId(row.get(0)?),
        text: row.get(1)?,
        created_at: timestamp_col(row, 2)?,
        updated_at: timestamp_col(row, 3)?,
        sync_status: parse_col(row, 4)?,
        version: row.get(5)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let task_data: Option<String> = row.get(3)?;
    let task_data = task_data
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
            })
        })
        .transpose()?;

    Ok(OutboxEntry {
        id: row.get(0)?,
        action: parse_col(row, 1)?,
        task_id: TaskId(row.get(2)?),
        task_data,
        status: parse_col(row, 4)?,
        created_at: timestamp_col(row, 5)?,
        retry_count: row.get(6)?,
    })
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {} out of range", ms).into(),
        )
    })
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
