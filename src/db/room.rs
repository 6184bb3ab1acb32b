//! Room model and repository.

use sqlx::SqliteConnection;

use crate::{RelayError, Result};

/// Room entity.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Room {
    /// Unique room ID.
    pub id: i64,
    /// Room name (unique).
    pub name: String,
    /// Whether the room has at least one occupant.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: String,
}

/// Active room with its current occupant count.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoomSummary {
    /// Room ID.
    pub id: i64,
    /// Room name.
    pub name: String,
    /// Number of memberships in the room.
    pub occupants: i64,
}

/// Repository for room rows.
pub struct RoomRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> RoomRepository<'c> {
    /// Create a new RoomRepository on the given connection or transaction.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get a room by ID.
    pub async fn get_by_id(&mut self, id: i64) -> Result<Option<Room>> {
        let room = sqlx::query_as::<_, Room>(
            "SELECT id, name, is_active, created_at FROM rooms WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(room)
    }

    /// Get a room by name.
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<Room>> {
        let room = sqlx::query_as::<_, Room>(
            "SELECT id, name, is_active, created_at FROM rooms WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(room)
    }

    /// Get a room by name, creating it inactive if absent.
    ///
    /// Creation is idempotent: a concurrent insert of the same name is
    /// absorbed by the unique constraint.
    pub async fn get_or_create(&mut self, name: &str) -> Result<Room> {
        sqlx::query("INSERT INTO rooms (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .execute(&mut *self.conn)
            .await?;

        self.get_by_name(name)
            .await?
            .ok_or_else(|| RelayError::UnknownRoom(name.to_string()))
    }

    /// Set the active flag of a room.
    pub async fn set_active(&mut self, id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE rooms SET is_active = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// List active rooms with occupant counts, busiest first.
    pub async fn list_active(&mut self) -> Result<Vec<RoomSummary>> {
        let rooms = sqlx::query_as::<_, RoomSummary>(
            "SELECT r.id, r.name, COUNT(j.id) AS occupants
             FROM rooms r
             LEFT JOIN joins j ON j.room_id = r.id
             WHERE r.is_active = 1
             GROUP BY r.id, r.name
             ORDER BY occupants DESC, r.id ASC",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rooms)
    }
}
