//! Test helpers for integration tests.
//!
//! Provides a relay backed by an in-memory database and a temporary
//! attachment folder, plus clients that read their outbound queue directly.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use chatrelay::chat::{ConnectionId, RoomInfo, ServerEvent, SessionCoordinator};
use chatrelay::config::ChatConfig;
use chatrelay::db::{Database, MembershipRepository, UserRepository};
use chatrelay::file::{AttachmentCodec, FileStorage};

/// A relay instance for tests.
pub struct TestRelay {
    /// Keeps the attachment folder alive.
    pub dir: TempDir,
    /// Shared coordinator.
    pub coordinator: Arc<SessionCoordinator>,
}

impl TestRelay {
    /// Create a relay with default chat settings.
    pub async fn new() -> Self {
        Self::with_settings(ChatConfig::default(), 20).await
    }

    /// Create a relay with custom chat settings and attachment limit.
    pub async fn with_settings(config: ChatConfig, max_files: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        let codec = AttachmentCodec::new(FileStorage::new(dir.path()).unwrap(), max_files);
        let coordinator = Arc::new(SessionCoordinator::new(db, codec, config));
        Self { dir, coordinator }
    }

    /// Open an unidentified connection.
    pub async fn open(&self) -> TestClient {
        let conn = ConnectionId::new();
        let rx = self.coordinator.open(conn).await;
        TestClient { conn, rx }
    }

    /// Open a connection and identify it as `name`, discarding the initial
    /// room list.
    pub async fn connect(&self, name: &str) -> TestClient {
        let mut client = self.open().await;
        self.coordinator.connect(client.conn, name).await.unwrap();
        client.drain();
        client
    }

    /// Database handle.
    pub fn db(&self) -> &Database {
        self.coordinator.database()
    }

    /// Check that no user holds two memberships, that every room is
    /// active exactly when occupied, and that active users match the live
    /// sessions.
    pub async fn assert_store_invariants(&self) {
        let sessions = self.coordinator.session_count().await as i64;
        let mut conn = self.db().pool().acquire().await.unwrap();

        let multiple = MembershipRepository::new(&mut conn)
            .count_users_with_multiple()
            .await
            .unwrap();
        assert_eq!(multiple, 0, "a user holds more than one membership");

        let mismatched: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rooms r
             WHERE r.is_active != (SELECT COUNT(*) > 0 FROM joins j WHERE j.room_id = r.id)",
        )
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(mismatched, 0, "room activity does not match occupancy");

        let active = UserRepository::new(&mut conn).count_active().await.unwrap();
        assert_eq!(active, sessions, "active users do not match live sessions");
    }

    /// Make every `event` (`INSERT`, `UPDATE` or `DELETE`) on `table` fail
    /// until [`TestRelay::restore`] is called.
    pub async fn fail_writes(&self, event: &str, table: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_{table} BEFORE {event} ON {table}
             BEGIN SELECT RAISE(ABORT, 'disk full'); END"
        );
        sqlx::query(&sql).execute(self.db().pool()).await.unwrap();
    }

    /// Remove a failure installed by [`TestRelay::fail_writes`].
    pub async fn restore(&self, table: &str) {
        sqlx::query(&format!("DROP TRIGGER fail_{table}"))
            .execute(self.db().pool())
            .await
            .unwrap();
    }

    /// Look up a user's ID by name.
    pub async fn user_id(&self, name: &str) -> Option<i64> {
        let mut conn = self.db().pool().acquire().await.unwrap();
        UserRepository::new(&mut conn)
            .get_by_name(name)
            .await
            .unwrap()
            .map(|u| u.id)
    }
}

/// A connection whose outbound events are read straight from its queue.
pub struct TestClient {
    /// Connection ID.
    pub conn: ConnectionId,
    /// Outbound queue.
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    /// Take every event queued so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Last room list among the queued events.
    pub fn last_rooms(&mut self) -> Option<Vec<RoomInfo>> {
        self.drain().into_iter().rev().find_map(|event| match event {
            ServerEvent::Rooms { rooms } => Some(rooms),
            _ => None,
        })
    }
}

/// Room list entry.
pub fn room(name: &str, count: i64) -> RoomInfo {
    RoomInfo {
        name: name.to_string(),
        count,
    }
}
