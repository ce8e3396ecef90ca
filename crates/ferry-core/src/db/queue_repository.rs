//! Sync queue repository implementation

use crate::error::{Error, Result};
use crate::models::{SyncTask, TaskId, TaskKind, TaskStatus, UnrecognizedTask};
use libsql::{params, Connection, Value};

/// Trait for sync queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncQueueRepository {
    /// Insert a task, or update it in place when the id already exists
    async fn put(&self, task: &SyncTask) -> Result<()>;

    /// Get a task by ID
    async fn get(&self, id: &TaskId) -> Result<Option<SyncTask>>;

    /// List tasks in any of the given statuses, oldest first.
    ///
    /// Ties on `created_at` fall back to insertion order.
    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<SyncTask>>;

    /// Delete a task, returning whether a row was removed
    async fn delete(&self, id: &TaskId) -> Result<bool>;

    /// Count tasks per status
    async fn count_by_status(&self) -> Result<Vec<(TaskStatus, usize)>>;

    /// Move drain-eligible rows with an unrecognised kind to `dead`
    async fn dead_letter_unknown_kinds(&self, now: i64) -> Result<usize>;

    /// Rows with an unrecognised kind in any status, oldest first
    async fn list_unrecognized(&self) -> Result<Vec<UnrecognizedTask>>;
}

/// libSQL implementation of `SyncQueueRepository`
pub struct LibSqlSyncQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_task(row: &libsql::Row) -> Result<SyncTask> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let status: String = row.get(3)?;
        let attempts: i64 = row.get(4)?;
        let error = match row.get_value(5)? {
            Value::Text(message) => Some(message),
            _ => None,
        };

        Ok(SyncTask {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid task ID: {id}")))?,
            kind: kind.parse().map_err(|_| {
                Error::InvalidInput(format!("task {id} has unrecognised kind '{kind}'"))
            })?,
            payload: serde_json::from_str(&payload)?,
            status: status.parse().map_err(Error::Database)?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            error,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn status_placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    fn known_kinds() -> String {
        TaskKind::ALL
            .iter()
            .map(|kind| format!("'{}'", kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl SyncQueueRepository for LibSqlSyncQueueRepository<'_> {
    async fn put(&self, task: &SyncTask) -> Result<()> {
        let payload = serde_json::to_string(&task.payload)?;
        let error = task.error.clone().map_or(Value::Null, Value::Text);

        self.conn
            .execute(
                "INSERT INTO sync_queue
                    (id, kind, payload, status, attempts, error, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    payload = excluded.payload,
                    status = excluded.status,
                    attempts = excluded.attempts,
                    error = excluded.error,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at",
                params![
                    task.id.as_str(),
                    task.kind.as_str(),
                    payload,
                    task.status.as_str(),
                    i64::from(task.attempts),
                    error,
                    task.created_at,
                    task.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, payload, status, attempts, error, created_at, updated_at
                 FROM sync_queue WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<SyncTask>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, kind, payload, status, attempts, error, created_at, updated_at
             FROM sync_queue
             WHERE status IN ({})
             ORDER BY created_at ASC, rowid ASC",
            Self::status_placeholders(statuses.len())
        );
        let values = statuses
            .iter()
            .map(|status| Value::Text(status.as_str().to_string()))
            .collect::<Vec<_>>();

        let mut rows = self.conn.query(&sql, values).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_task(&row) {
                Ok(task) => tasks.push(task),
                Err(error) => {
                    let id = row.get::<String>(0).unwrap_or_default();
                    tracing::warn!("Skipping unreadable sync task {id}: {error}");
                }
            }
        }

        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(removed > 0)
    }

    async fn count_by_status(&self) -> Result<Vec<(TaskStatus, usize)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM sync_queue GROUP BY status ORDER BY status",
                (),
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            if let Ok(status) = status.parse::<TaskStatus>() {
                counts.push((status, usize::try_from(count).unwrap_or(0)));
            }
        }
        Ok(counts)
    }

    async fn dead_letter_unknown_kinds(&self, now: i64) -> Result<usize> {
        let known = Self::known_kinds();
        let sql = format!(
            "UPDATE sync_queue
             SET status = 'dead', error = 'unknown task kind: ' || kind, updated_at = ?
             WHERE status IN ('pending', 'failed') AND kind NOT IN ({known})"
        );

        let moved = self.conn.execute(&sql, [now]).await?;
        Ok(usize::try_from(moved).unwrap_or(usize::MAX))
    }

    async fn list_unrecognized(&self) -> Result<Vec<UnrecognizedTask>> {
        let sql = format!(
            "SELECT id, kind, status, attempts, error, created_at, updated_at
             FROM sync_queue
             WHERE kind NOT IN ({})
             ORDER BY created_at ASC, rowid ASC",
            Self::known_kinds()
        );

        let mut rows = self.conn.query(&sql, ()).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            let attempts: i64 = row.get(3)?;
            tasks.push(UnrecognizedTask {
                id: row.get(0)?,
                kind: row.get(1)?,
                status: row.get(2)?,
                attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
                error: match row.get_value(4)? {
                    Value::Text(message) => Some(message),
                    _ => None,
                },
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            });
        }
        Ok(tasks)
    }
}
