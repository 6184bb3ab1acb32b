//! Database module for the chat relay.
//!
//! This module provides SQLite connectivity through sqlx, migration
//! management and the repositories for users, rooms, membership and
//! history.

mod history;
mod membership;
mod room;
mod schema;
mod user;

pub use history::{FileRecord, HistoryKind, HistoryRecord, HistoryRepository};
pub use membership::{Membership, MembershipRepository};
pub use room::{Room, RoomRepository, RoomSummary};
pub use schema::MIGRATIONS;
pub use user::{User, UserRepository};

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::Result;

/// Connection pool type used by the repositories.
pub type DbPool = SqlitePool;

/// Transaction handle. Dropping it without `commit` rolls back.
pub type DbTransaction = Transaction<'static, Sqlite>;

/// Name of the reserved user that owns system notifications.
pub const SYSTEM_USER: &str = "system";

/// Database wrapper for managing the SQLite pool and migrations.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a database at the specified path.
    ///
    /// The file and its parent directories are created if missing.
    /// Migrations are automatically applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// The pool holds exactly one connection that never expires, since each
    /// SQLite in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Begin a new transaction.
    pub async fn begin(&self) -> Result<DbTransaction> {
        Ok(self.pool.begin().await?)
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;
        Ok(version)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;

        if current_version as usize >= MIGRATIONS.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            MIGRATIONS.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!("Migration v{} applied successfully", version);
        }

        Ok(())
    }

    /// Reconcile live state after a process start.
    ///
    /// No connection survives a restart, so every membership is dropped and
    /// every user and room is marked inactive. History is kept.
    pub async fn reset_live_state(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM joins").execute(&mut *tx).await?;
        sqlx::query("UPDATE rooms SET is_active = 0, updated_at = datetime('now')")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE users SET is_active = 0, connection_id = NULL, updated_at = datetime('now')",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Live state reset: memberships cleared, users and rooms inactive");
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.schema_version().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_migrations_applied() {
        let db = Database::open_in_memory().await.unwrap();
        let version = db.schema_version().await.unwrap();
        assert_eq!(version as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_tables_exist() {
        let db = Database::open_in_memory().await.unwrap();
        for table in ["users", "rooms", "joins", "messages", "images", "files"] {
            assert!(db.table_exists(table).await.unwrap(), "{table} missing");
        }
        assert!(!db.table_exists("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_system_user_seeded() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::new(&mut conn)
            .get_by_name(SYSTEM_USER)
            .await
            .unwrap()
            .unwrap();
        assert!(!user.is_active);
    }

    #[tokio::test]
    async fn test_transaction_rollback_on_drop() {
        let db = Database::open_in_memory().await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            sqlx::query("INSERT INTO rooms (name) VALUES ('dropped')")
                .execute(&mut *tx)
                .await
                .unwrap();
            // not committed
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms WHERE name = 'dropped'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_reset_live_state() {
        let db = Database::open_in_memory().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let user = UserRepository::new(&mut tx)
            .create("alice", "conn-1")
            .await
            .unwrap();
        let room = RoomRepository::new(&mut tx)
            .get_or_create("general")
            .await
            .unwrap();
        RoomRepository::new(&mut tx)
            .set_active(room.id, true)
            .await
            .unwrap();
        MembershipRepository::new(&mut tx)
            .insert(room.id, user.id)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        db.reset_live_state().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::new(&mut conn)
            .get_by_id(user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!user.is_active);
        assert!(user.connection_id.is_none());
        assert!(MembershipRepository::new(&mut conn)
            .get_for_user(user.id)
            .await
            .unwrap()
            .is_none());
        assert!(RoomRepository::new(&mut conn)
            .list_active()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("relay.db");

        {
            let db = Database::open(&db_path).await.unwrap();
            assert!(db.table_exists("users").await.unwrap());
        }

        let db = Database::open(&db_path).await.unwrap();
        assert_eq!(
            db.schema_version().await.unwrap() as usize,
            MIGRATIONS.len()
        );
    }
}
