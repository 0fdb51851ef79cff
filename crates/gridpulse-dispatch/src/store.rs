//! SQLite-backed task store.
//!
//! Single `tasks` table, WAL mode, RFC3339 timestamp columns, JSON text
//! columns for the opaque bags. Status transitions that must not race
//! (execute claims, due-task pickup, cancellation) are single
//! `UPDATE ... RETURNING` statements, so two processes sharing the file
//! cannot double-claim a task.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use gridpulse_core::error::{GridPulseError, Result};

use crate::task::{Capability, NewTask, Task, TaskPatch, TaskPriority, TaskStatus};

const TASK_COLUMNS: &str = "id, name, description, capability, provider, params, status, priority, \
     created_by, created_at, scheduled_for, started_at, completed_at, result, error, \
     parent_task_id, metadata";

/// Task database — persistent storage for all dispatch state.
pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .map_err(|e| GridPulseError::Database(format!("open {}: {e}", path.display())))?;

        // WAL for concurrent readers alongside the poller's writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GridPulseError::Database(format!("open :memory:: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                capability TEXT NOT NULL,
                provider TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                created_by TEXT,
                created_at TEXT NOT NULL,
                scheduled_for TEXT,
                started_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                parent_task_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, scheduled_for);
            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id);
            ",
        )
        .map_err(|e| GridPulseError::Database(format!("migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GridPulseError::Database(format!("lock: {e}")))
    }

    // ─── CRUD ─────────────────────────────────────────────────

    /// Persist a new task. Status is Pending, or Scheduled when
    /// `scheduled_for` is set.
    pub fn create(&self, new: NewTask) -> Result<Task> {
        let task = Task::from_new(new);
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"),
            params![
                task.id,
                task.name,
                task.description,
                task.capability.as_str(),
                task.provider,
                task.params.to_string(),
                task.status.as_str(),
                task.priority.as_str(),
                task.created_by,
                task.created_at.to_rfc3339(),
                task.scheduled_for.map(|t| t.to_rfc3339()),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.result.as_ref().map(|v| v.to_string()),
                task.error,
                task.parent_task_id,
                task.metadata.to_string(),
            ],
        )
        .map_err(|e| GridPulseError::Database(format!("insert task: {e}")))?;
        tracing::info!("📋 Task created: '{}' ({})", task.name, task.id);
        Ok(task)
    }

    /// Fetch a task by id.
    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id],
            task_from_row,
        )
        .optional()
        .map_err(|e| GridPulseError::Database(format!("get task: {e}")))
    }

    /// Fetch a task by id, NotFound when missing.
    pub fn get_existing(&self, id: &str) -> Result<Task> {
        self.get(id)?
            .ok_or_else(|| GridPulseError::NotFound(format!("task '{id}'")))
    }

    /// List all tasks, oldest first.
    pub fn list(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at"),
            params![],
        )
    }

    /// List tasks with a given status.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at"),
            params![status.as_str()],
        )
    }

    /// Pending children of a completed parent, for fan-out.
    pub fn pending_children(&self, parent_id: &str) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE parent_task_id = ?1 AND status = 'pending' ORDER BY created_at"
            ),
            params![parent_id],
        )
    }

    /// Apply a partial update. Only Pending/Scheduled tasks can be patched;
    /// setting `scheduled_for` moves a Pending task to Scheduled.
    pub fn update_fields(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let conn = self.lock()?;
        let mut task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                task_from_row,
            )
            .optional()
            .map_err(|e| GridPulseError::Database(format!("get task: {e}")))?
            .ok_or_else(|| GridPulseError::NotFound(format!("task '{id}'")))?;

        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Scheduled) {
            return Err(GridPulseError::Conflict(format!(
                "task '{id}' is {} and can no longer be updated",
                task.status.as_str()
            )));
        }

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(params) = patch.params {
            task.params = params;
        }
        if let Some(metadata) = patch.metadata {
            task.metadata = metadata;
        }
        if let Some(at) = patch.scheduled_for {
            task.scheduled_for = Some(at);
            task.status = TaskStatus::Scheduled;
        }

        conn.execute(
            "UPDATE tasks SET name = ?1, description = ?2, priority = ?3, params = ?4, \
             metadata = ?5, scheduled_for = ?6, status = ?7 WHERE id = ?8",
            params![
                task.name,
                task.description,
                task.priority.as_str(),
                task.params.to_string(),
                task.metadata.to_string(),
                task.scheduled_for.map(|t| t.to_rfc3339()),
                task.status.as_str(),
                task.id,
            ],
        )
        .map_err(|e| GridPulseError::Database(format!("update task: {e}")))?;
        Ok(task)
    }

    /// Physically delete a task. Returns false when no such row existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(|e| GridPulseError::Database(format!("delete task: {e}")))?;
        Ok(n > 0)
    }

    // ─── Atomic transitions ───────────────────────────────────

    /// Claim a task for execution: atomically move it to InProgress iff its
    /// current status is one of `from`. Returns None when the guard does not
    /// match (someone else claimed it, or it is terminal).
    pub fn claim(&self, id: &str, from: &[TaskStatus]) -> Result<Option<Task>> {
        let guard = status_in_list(from);
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "UPDATE tasks SET status = 'in_progress', started_at = ?1, error = NULL \
                 WHERE id = ?2 AND status IN ({guard}) RETURNING {TASK_COLUMNS}"
            ),
            params![Utc::now().to_rfc3339(), id],
            task_from_row,
        )
        .optional()
        .map_err(|e| GridPulseError::Database(format!("claim task: {e}")))
    }

    /// Claim all due scheduled tasks (scheduled_for <= now), highest priority
    /// first. Each returned task is already InProgress — a second poller
    /// scanning concurrently gets none of them.
    pub fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "UPDATE tasks SET status = 'in_progress', started_at = ?1 \
                 WHERE id IN ( \
                     SELECT id FROM tasks \
                     WHERE status = 'scheduled' AND scheduled_for <= ?1 \
                     ORDER BY CASE priority \
                         WHEN 'critical' THEN 0 WHEN 'high' THEN 1 \
                         WHEN 'medium' THEN 2 ELSE 3 END, \
                         scheduled_for \
                     LIMIT ?2 \
                 ) RETURNING {TASK_COLUMNS}"
            ))
            .map_err(|e| GridPulseError::Database(format!("claim due: {e}")))?;
        let rows = stmt
            .query_map(params![now.to_rfc3339(), limit as i64], task_from_row)
            .map_err(|e| GridPulseError::Database(format!("claim due: {e}")))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| GridPulseError::Database(format!("claim due row: {e}")))?);
        }
        Ok(tasks)
    }

    /// Record a successful run. No-op when the task is no longer InProgress
    /// (a cancel observed mid-flight wins; the result is discarded).
    pub fn mark_completed(&self, id: &str, result: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE tasks SET status = 'completed', completed_at = ?1, result = ?2, error = NULL \
                 WHERE id = ?3 AND status = 'in_progress'",
                params![Utc::now().to_rfc3339(), result.to_string(), id],
            )
            .map_err(|e| GridPulseError::Database(format!("mark completed: {e}")))?;
        if n == 0 {
            tracing::debug!("Task {id} left in_progress before completion (cancelled?)");
        }
        Ok(())
    }

    /// Record a failed run. Same cancel-wins rule as `mark_completed`.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE tasks SET status = 'failed', completed_at = ?1, error = ?2 \
                 WHERE id = ?3 AND status = 'in_progress'",
                params![Utc::now().to_rfc3339(), error, id],
            )
            .map_err(|e| GridPulseError::Database(format!("mark failed: {e}")))?;
        if n == 0 {
            tracing::debug!("Task {id} left in_progress before failure was recorded");
        }
        Ok(())
    }

    /// Cancel a pre-terminal task. NotFound for unknown ids, Conflict when
    /// the task already reached a terminal state. Does not abort I/O already
    /// in flight — an in-progress handler finishes, its outcome is discarded.
    pub fn cancel(&self, id: &str) -> Result<Task> {
        let conn = self.lock()?;
        let cancelled = conn
            .query_row(
                &format!(
                    "UPDATE tasks SET status = 'cancelled' \
                     WHERE id = ?1 AND status IN ('pending', 'scheduled', 'in_progress') \
                     RETURNING {TASK_COLUMNS}"
                ),
                [id],
                task_from_row,
            )
            .optional()
            .map_err(|e| GridPulseError::Database(format!("cancel task: {e}")))?;

        match cancelled {
            Some(task) => {
                tracing::info!("🚫 Task cancelled: '{}' ({})", task.name, task.id);
                Ok(task)
            }
            None => {
                let existing = conn
                    .query_row(
                        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                        [id],
                        task_from_row,
                    )
                    .optional()
                    .map_err(|e| GridPulseError::Database(format!("get task: {e}")))?;
                match existing {
                    Some(t) => Err(GridPulseError::Conflict(format!(
                        "task '{id}' is already {}",
                        t.status.as_str()
                    ))),
                    None => Err(GridPulseError::NotFound(format!("task '{id}'"))),
                }
            }
        }
    }

    /// Replace a task's parameter bag (fan-out result splicing).
    pub fn set_params(&self, id: &str, params_value: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET params = ?1 WHERE id = ?2",
            params![params_value.to_string(), id],
        )
        .map_err(|e| GridPulseError::Database(format!("set params: {e}")))?;
        Ok(())
    }

    /// Boot-time recovery: tasks left InProgress by a previous process are
    /// marked Failed (retryable) instead of staying stuck forever.
    pub fn recover_stuck(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE tasks SET status = 'failed', completed_at = ?1, error = ?2 \
                 WHERE status = 'in_progress'",
                params![
                    Utc::now().to_rfc3339(),
                    "retryable: process restarted while task was in progress",
                ],
            )
            .map_err(|e| GridPulseError::Database(format!("recover stuck: {e}")))?;
        if n > 0 {
            tracing::warn!("♻️ Recovered {n} task(s) stuck in_progress from a previous run");
        }
        Ok(n)
    }

    fn query_tasks(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| GridPulseError::Database(format!("prepare: {e}")))?;
        let rows = stmt
            .query_map(params, task_from_row)
            .map_err(|e| GridPulseError::Database(format!("query: {e}")))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| GridPulseError::Database(format!("row: {e}")))?);
        }
        Ok(tasks)
    }
}

/// Render a status slice as a quoted SQL IN list. Inputs are the enum's own
/// `as_str` values, never caller strings.
fn status_in_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    fn bad(idx: usize, msg: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
    }

    let capability_str: String = row.get(3)?;
    let capability = Capability::parse(&capability_str)
        .ok_or_else(|| bad(3, format!("unknown capability '{capability_str}'")))?;

    let status_str: String = row.get(6)?;
    let status = TaskStatus::parse(&status_str)
        .ok_or_else(|| bad(6, format!("unknown status '{status_str}'")))?;

    let priority_str: String = row.get(7)?;
    let priority = TaskPriority::parse(&priority_str).unwrap_or_default();

    let params_str: String = row.get(5)?;
    let metadata_str: String = row.get(16)?;
    let result_str: Option<String> = row.get(13)?;

    let created_at_str: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    let parse_opt = |s: Option<String>| {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc))
    };

    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        capability,
        provider: row.get(4)?,
        params: serde_json::from_str(&params_str).unwrap_or_default(),
        status,
        priority,
        created_by: row.get(8)?,
        created_at,
        scheduled_for: parse_opt(row.get(10)?),
        started_at: parse_opt(row.get(11)?),
        completed_at: parse_opt(row.get(12)?),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(14)?,
        parent_task_id: row.get(15)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
    })
}
