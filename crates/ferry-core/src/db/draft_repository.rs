//! Draft and backup repository implementation

use crate::error::{Error, Result};
use crate::models::{Backup, Draft};
use libsql::{params, Connection};

/// Trait for draft storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DraftRepository {
    /// Save a draft, replacing any previous draft for the same entity
    async fn put(&self, draft: &Draft) -> Result<()>;

    /// Get the draft for an entity
    async fn get(&self, id: &str) -> Result<Option<Draft>>;

    /// Delete the draft for an entity, returning whether one existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Append a safety backup
    async fn put_backup(&self, backup: &Backup) -> Result<()>;

    /// List backups for a form, newest first
    async fn list_backups(&self, form_id: &str) -> Result<Vec<Backup>>;
}

/// libSQL implementation of `DraftRepository`
pub struct LibSqlDraftRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDraftRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_backup(row: &libsql::Row) -> Result<Backup> {
        let id: String = row.get(0)?;
        let data: String = row.get(2)?;
        Ok(Backup {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid backup ID: {id}")))?,
            form_id: row.get(1)?,
            data: serde_json::from_str(&data)?,
            created_at: row.get(3)?,
        })
    }
}

impl DraftRepository for LibSqlDraftRepository<'_> {
    async fn put(&self, draft: &Draft) -> Result<()> {
        let data = serde_json::to_string(&draft.data)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO drafts (id, data, updated_at) VALUES (?, ?, ?)",
                params![draft.id.as_str(), data, draft.updated_at],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Draft>> {
        let mut rows = self
            .conn
            .query("SELECT id, data, updated_at FROM drafts WHERE id = ?", [id])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let data: String = row.get(1)?;
        Ok(Some(Draft {
            id: row.get(0)?,
            data: serde_json::from_str(&data)?,
            updated_at: row.get(2)?,
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM drafts WHERE id = ?", [id])
            .await?;
        Ok(removed > 0)
    }

    async fn put_backup(&self, backup: &Backup) -> Result<()> {
        let data = serde_json::to_string(&backup.data)?;
        self.conn
            .execute(
                "INSERT INTO backups (id, form_id, data, created_at) VALUES (?, ?, ?, ?)",
                params![
                    backup.id.as_str(),
                    backup.form_id.as_str(),
                    data,
                    backup.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_backups(&self, form_id: &str) -> Result<Vec<Backup>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, form_id, data, created_at
                 FROM backups
                 WHERE form_id = ?
                 ORDER BY created_at DESC, id DESC",
                [form_id],
            )
            .await?;

        let mut backups = Vec::new();
        while let Some(row) = rows.next().await? {
            backups.push(Self::parse_backup(&row)?);
        }
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Snapshot;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn snapshot(value: serde_json::Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_draft_overwrites_single_slot() {
        let db = setup().await;
        let repo = LibSqlDraftRepository::new(db.connection());

        repo.put(&Draft::new("intake-1", snapshot(json!({"a": 1}))))
            .await
            .unwrap();
        repo.put(&Draft::new("intake-1", snapshot(json!({"a": 2, "b": "x"}))))
            .await
            .unwrap();

        let draft = repo.get("intake-1").await.unwrap().unwrap();
        assert_eq!(draft.data, snapshot(json!({"a": 2, "b": "x"})));

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM drafts", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_draft_delete() {
        let db = setup().await;
        let repo = LibSqlDraftRepository::new(db.connection());

        repo.put(&Draft::new("intake-2", Snapshot::new())).await.unwrap();
        assert!(repo.delete("intake-2").await.unwrap());
        assert!(repo.get("intake-2").await.unwrap().is_none());
        assert!(!repo.delete("intake-2").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backups_listed_per_form_newest_first() {
        let db = setup().await;
        let repo = LibSqlDraftRepository::new(db.connection());

        let mut older = Backup::new("form-a", snapshot(json!({"v": 1})));
        older.created_at = 100;
        let mut newer = Backup::new("form-a", snapshot(json!({"v": 2})));
        newer.created_at = 200;
        let other = Backup::new("form-b", snapshot(json!({"v": 3})));

        for backup in [&older, &newer, &other] {
            repo.put_backup(backup).await.unwrap();
        }

        let listed = repo.list_backups("form-a").await.unwrap();
        assert_eq!(listed, vec![newer, older]);
    }
}
