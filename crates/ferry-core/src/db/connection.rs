//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Database wrapper for the local libSQL file backing the offline store
pub struct Database {
    // Dropping the database handle closes the file, so it lives as long as the connection.
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.initialize().await?;
        tracing::debug!("Opened offline store at {path_str}");
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.initialize().await?;
        Ok(database)
    }

    /// Configure `SQLite` for a single-writer local store
    async fn configure(&self) -> Result<()> {
        // WAL is unsupported for in-memory databases, so failures are ignored
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Create collections and indexes that do not exist yet.
    ///
    /// Safe to call any number of times.
    pub async fn initialize(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db.connection().query("SELECT 1", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let val: i32 = row.get(0).unwrap();
        assert_eq!(val, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.initialize().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_creates_database() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("ferry.db");

        let db = Database::open(&db_path).await.unwrap();
        drop(db);
        assert!(db_path.exists());

        // Reopening an existing file must not re-run applied migrations
        Database::open(&db_path).await.unwrap();
    }
}
