//! Room membership (the `joins` table).

use sqlx::SqliteConnection;

use crate::Result;

/// A user's current room.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Membership {
    /// Membership row ID.
    pub id: i64,
    /// Room the user occupies.
    pub room_id: i64,
    /// Room name, joined in for convenience.
    pub room_name: String,
    /// Member user ID.
    pub user_id: i64,
}

/// Repository for membership rows.
pub struct MembershipRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> MembershipRepository<'c> {
    /// Create a new MembershipRepository on the given connection or transaction.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Get the membership of a user, if any.
    pub async fn get_for_user(&mut self, user_id: i64) -> Result<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT j.id, j.room_id, r.name AS room_name, j.user_id
             FROM joins j
             INNER JOIN rooms r ON r.id = j.room_id
             WHERE j.user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(membership)
    }

    /// Count memberships in a room.
    pub async fn count_in_room(&mut self, room_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM joins WHERE room_id = ?")
            .bind(room_id)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Insert a membership. Fails if the user already has one.
    pub async fn insert(&mut self, room_id: i64, user_id: i64) -> Result<i64> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO joins (room_id, user_id) VALUES (?, ?) RETURNING id")
                .bind(room_id)
                .bind(user_id)
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(id)
    }

    /// Delete a user's membership.
    ///
    /// Returns true if a row was deleted.
    pub async fn delete_for_user(&mut self, user_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM joins WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count users holding more than one membership. Always zero.
    pub async fn count_users_with_multiple(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (SELECT user_id FROM joins GROUP BY user_id HAVING COUNT(*) > 1)",
        )
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(count)
    }
}
