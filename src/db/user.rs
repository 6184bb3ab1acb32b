//! User model and repository.
//!
//! A user is an identity bound to a display name. It is active while a live
//! connection owns it.

use sqlx::SqliteConnection;

use crate::{RelayError, Result};

/// User entity.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: i64,
    /// Display name (unique, case-sensitive).
    pub name: String,
    /// Connection currently owning this user, if any.
    pub connection_id: Option<String>,
    /// Whether a live connection owns this user.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: String,
}

/// Repository for user rows.
///
/// Works on a single connection so it can run inside a transaction.
pub struct UserRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> UserRepository<'c> {
    /// Create a new UserRepository on the given connection or transaction.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Create an active user owned by `connection_id`.
    pub async fn create(&mut self, name: &str, connection_id: &str) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (name, connection_id, is_active) VALUES (?, ?, 1) RETURNING id",
        )
        .bind(name)
        .bind(connection_id)
        .fetch_one(&mut *self.conn)
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| RelayError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, connection_id, is_active, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(user)
    }

    /// Get a user by exact (case-sensitive) name.
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, connection_id, is_active, created_at FROM users WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(user)
    }

    /// Bind an existing user to a new connection and mark it active.
    pub async fn activate(&mut self, id: i64, connection_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE users SET connection_id = ?, is_active = 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(connection_id)
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Mark a user inactive and clear its connection.
    pub async fn deactivate(&mut self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET connection_id = NULL, is_active = 0, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Count active users.
    pub async fn count_active(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }
}
