//! Chat history storage.
//!
//! Messages, images and files live in separate tables but share one
//! ordering sequence, so a room's history can be merged chronologically.

use sqlx::SqliteConnection;

use crate::Result;

/// Kind of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    /// Text message (including persisted system notifications).
    Message,
    /// Inline image.
    Image,
    /// File attachment.
    File,
}

/// A history record of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Position in the shared history sequence.
    pub seq: i64,
    /// Record kind.
    pub kind: HistoryKind,
    /// Sender name.
    pub user_name: String,
    /// Message text, transport-encoded image, or filename.
    pub body: String,
    /// Download link (files only, NULL until stored).
    pub link: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

/// Database row type for HistoryRecord.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    seq: i64,
    kind: String,
    user_name: String,
    body: String,
    link: Option<String>,
    created_at: String,
}

impl From<HistoryRow> for HistoryRecord {
    fn from(row: HistoryRow) -> Self {
        let kind = match row.kind.as_str() {
            "image" => HistoryKind::Image,
            "file" => HistoryKind::File,
            _ => HistoryKind::Message,
        };

        Self {
            seq: row.seq,
            kind,
            user_name: row.user_name,
            body: row.body,
            link: row.link,
            created_at: row.created_at,
        }
    }
}

/// A file attachment row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileRecord {
    /// History ID (used in download links).
    pub id: i64,
    /// Room the file was sent to.
    pub room_id: i64,
    /// Sender user ID.
    pub user_id: i64,
    /// Sanitized filename.
    pub filename: String,
    /// Storage handle, NULL until the bytes are written.
    pub save_name: Option<String>,
    /// Download link, NULL until the bytes are written.
    pub link: Option<String>,
    /// Whether the bytes are stored.
    pub is_available: bool,
    /// Creation timestamp.
    pub created_at: String,
}

/// Repository for history rows.
pub struct HistoryRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> HistoryRepository<'c> {
    /// Create a new HistoryRepository on the given connection or transaction.
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    async fn next_seq(&mut self) -> Result<i64> {
        let seq: i64 = sqlx::query_scalar(
            "UPDATE history_sequence SET value = value + 1 WHERE id = 1 RETURNING value",
        )
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(seq)
    }

    /// Append a text message. Returns the message ID.
    pub async fn append_message(&mut self, room_id: i64, user_id: i64, text: &str) -> Result<i64> {
        let seq = self.next_seq().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (seq, room_id, user_id, message) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(seq)
        .bind(room_id)
        .bind(user_id)
        .bind(text)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    /// Append a message owned by the system user.
    pub async fn append_system(&mut self, room_id: i64, text: &str) -> Result<i64> {
        let system_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE name = ?")
            .bind(super::SYSTEM_USER)
            .fetch_one(&mut *self.conn)
            .await?;
        self.append_message(room_id, system_id, text).await
    }

    /// Append an image. `data` is stored transport-encoded.
    pub async fn append_image(&mut self, room_id: i64, user_id: i64, data: &str) -> Result<i64> {
        let seq = self.next_seq().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO images (seq, room_id, user_id, image) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(seq)
        .bind(room_id)
        .bind(user_id)
        .bind(data)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    /// Append a file row without storage details. Returns the history ID.
    pub async fn append_file(&mut self, room_id: i64, user_id: i64, filename: &str) -> Result<i64> {
        let seq = self.next_seq().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO files (seq, room_id, user_id, filename) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(seq)
        .bind(room_id)
        .bind(user_id)
        .bind(filename)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(id)
    }

    /// Record where a file's bytes were stored and make it available.
    ///
    /// Returns false if the row vanished in the meantime.
    pub async fn attach_file(&mut self, id: i64, save_name: &str, link: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET save_name = ?, link = ?, is_available = 1 WHERE id = ?",
        )
        .bind(save_name)
        .bind(link)
        .bind(id)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Most recent `limit` records of a room, oldest first.
    pub async fn recent(&mut self, room_id: i64, limit: u32) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT seq, kind, user_name, body, link, created_at FROM (
                SELECT m.seq, 'message' AS kind, u.name AS user_name, m.message AS body,
                       NULL AS link, m.created_at
                FROM messages m INNER JOIN users u ON u.id = m.user_id
                WHERE m.room_id = ?
                UNION ALL
                SELECT i.seq, 'image', u.name, i.image, NULL, i.created_at
                FROM images i INNER JOIN users u ON u.id = i.user_id
                WHERE i.room_id = ?
                UNION ALL
                SELECT f.seq, 'file', u.name, f.filename, f.link, f.created_at
                FROM files f INNER JOIN users u ON u.id = f.user_id
                WHERE f.room_id = ?
             )
             ORDER BY seq DESC
             LIMIT ?",
        )
        .bind(room_id)
        .bind(room_id)
        .bind(room_id)
        .bind(i64::from(limit))
        .fetch_all(&mut *self.conn)
        .await?;

        let mut records: Vec<HistoryRecord> = rows.into_iter().map(HistoryRecord::from).collect();
        records.reverse();
        Ok(records)
    }

    /// Get a file row by history ID.
    pub async fn get_file(&mut self, id: i64) -> Result<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(
            "SELECT id, room_id, user_id, filename, save_name, link, is_available, created_at
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(file)
    }

    /// Files whose bytes are stored, oldest first.
    pub async fn stored_files(&mut self) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(
            "SELECT id, room_id, user_id, filename, save_name, link, is_available, created_at
             FROM files WHERE save_name IS NOT NULL ORDER BY id ASC",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(files)
    }

    /// Delete a file row. Returns true if a row was deleted.
    pub async fn delete_file(&mut self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
