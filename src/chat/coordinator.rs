//! Session coordinator.
//!
//! Owns the live mapping from connections to users and runs every chat
//! operation: a store transaction followed by its fan-out step. Operations
//! are serialized by a gate, so fan-out order always matches commit order.

use std::collections::HashMap;

use sqlx::SqliteConnection;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::db::{
    Database, HistoryRepository, Membership, MembershipRepository, RoomRepository, User,
    UserRepository, SYSTEM_USER,
};
use crate::file::{sanitize_filename, AttachmentCodec};
use crate::{ErrorClass, RelayError, Result};

use super::{
    ChatEntry, ClientEvent, ConnectionId, Fanout, Group, Payload, RoomRegistry, ServerEvent,
};

/// Content submitted by `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Text message.
    Text(String),
    /// Transport-encoded image.
    Image(String),
    /// Transport-encoded file with its filename.
    File {
        /// Client-supplied filename.
        filename: String,
        /// Transport-encoded content.
        data: String,
    },
}

/// What the transport should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading events.
    Continue,
    /// Close the connection.
    Close,
}

/// Room a session currently occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRef {
    /// Room ID.
    pub id: i64,
    /// Room name.
    pub name: String,
}

/// An identified connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Owning user ID.
    pub user_id: i64,
    /// User display name.
    pub user_name: String,
    /// Current room, `None` while in the lobby.
    pub room: Option<RoomRef>,
}

/// Coordinates sessions, rooms and history.
pub struct SessionCoordinator {
    db: Database,
    fanout: Fanout,
    codec: AttachmentCodec,
    config: ChatConfig,
    sessions: RwLock<HashMap<ConnectionId, Session>>,
    gate: Mutex<()>,
}

impl SessionCoordinator {
    /// Create a coordinator.
    pub fn new(db: Database, codec: AttachmentCodec, config: ChatConfig) -> Self {
        let fanout = Fanout::new(config.outbound_capacity);
        Self {
            db,
            fanout,
            codec,
            config,
            sessions: RwLock::new(HashMap::new()),
            gate: Mutex::new(()),
        }
    }

    /// Get the database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Get the attachment codec.
    pub fn codec(&self) -> &AttachmentCodec {
        &self.codec
    }

    /// Get the fan-out.
    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Register a new, unidentified connection.
    pub async fn open(&self, conn: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        debug!("Connection {} opened", conn);
        self.fanout.attach(conn).await
    }

    /// Session of a connection, if identified.
    pub async fn session(&self, conn: ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(&conn).cloned()
    }

    /// Number of identified connections.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Handle one inbound event and report any failure to the connection.
    pub async fn dispatch(&self, conn: ConnectionId, event: ClientEvent) -> Flow {
        let result = match event {
            ClientEvent::Connect { name } => self
                .connect(conn, name.as_deref().unwrap_or_default())
                .await
                .map(|_| ()),
            ClientEvent::Join { room } => self.join(conn, room.as_deref().unwrap_or_default()).await,
            ClientEvent::Leave => self.leave(conn).await,
            ClientEvent::Message { text } => self.send(conn, Submission::Text(text)).await,
            ClientEvent::Image { data } => self.send(conn, Submission::Image(data)).await,
            ClientEvent::File { filename, data } => {
                self.send(conn, Submission::File { filename, data }).await
            }
            ClientEvent::Disconnect => return Flow::Close,
            ClientEvent::Ping => {
                self.fanout.unicast(ServerEvent::Pong, conn).await;
                Ok(())
            }
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => self.reject(conn, &e).await,
        }
    }

    /// Send an error event to a connection.
    ///
    /// Returns whether the connection must be closed.
    pub async fn reject(&self, conn: ConnectionId, err: &RelayError) -> Flow {
        let message = match err.class() {
            ErrorClass::Storage => {
                error!("Operation failed for {}: {}", conn, err);
                "internal storage error".to_string()
            }
            _ => {
                debug!("Rejected event from {}: {}", conn, err);
                err.to_string()
            }
        };
        self.fanout
            .unicast(ServerEvent::error(err.code(), message), conn)
            .await;

        if err.terminates_connection() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    /// Bind a connection to a user name and move it to the lobby.
    pub async fn connect(&self, conn: ConnectionId, name: &str) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RelayError::NameRequired);
        }

        let _gate = self.gate.lock().await;
        if self.sessions.read().await.contains_key(&conn) {
            return Err(RelayError::AlreadyIdentified);
        }
        if name == SYSTEM_USER {
            return Err(RelayError::NameAlreadyActive(name.to_string()));
        }

        let conn_id = conn.to_string();
        let mut tx = self.db.begin().await?;
        let user = {
            let mut users = UserRepository::new(&mut tx);
            match users.get_by_name(name).await? {
                None => users.create(name, &conn_id).await?,
                Some(user) if user.is_active => {
                    return Err(RelayError::NameAlreadyActive(name.to_string()));
                }
                Some(user) => {
                    users.activate(user.id, &conn_id).await?;
                    users
                        .get_by_id(user.id)
                        .await?
                        .ok_or_else(|| RelayError::NotFound(format!("user {}", user.id)))?
                }
            }
        };
        tx.commit().await?;

        self.sessions.write().await.insert(
            conn,
            Session {
                user_id: user.id,
                user_name: user.name.clone(),
                room: None,
            },
        );
        self.fanout.subscribe(conn, Group::Lobby).await;

        let rooms = RoomRegistry::new(&self.db).list_active_rooms().await?;
        self.fanout.unicast(ServerEvent::Rooms { rooms }, conn).await;

        info!("{} connected as '{}' (user {})", conn, user.name, user.id);
        Ok(user)
    }

    /// Move a connection into a room, creating the room if needed.
    pub async fn join(&self, conn: ConnectionId, room_name: &str) -> Result<()> {
        let room_name = room_name.trim();
        if room_name.is_empty() {
            return Err(RelayError::RoomNameRequired);
        }
        if room_name == self.config.lobby_name {
            return Err(RelayError::ReservedRoomName(room_name.to_string()));
        }

        let _gate = self.gate.lock().await;
        let session = self.require_session(conn).await?;

        let mut tx = self.db.begin().await?;
        let room = RoomRepository::new(&mut tx).get_or_create(room_name).await?;

        let previous = MembershipRepository::new(&mut tx)
            .get_for_user(session.user_id)
            .await?;
        let rejoin = matches!(&previous, Some(m) if m.room_id == room.id);
        let moved_from = match previous {
            Some(membership) if !rejoin => {
                self.release_membership(&mut tx, &membership, &session.user_name)
                    .await?;
                Some(membership)
            }
            _ => None,
        };

        if !rejoin {
            MembershipRepository::new(&mut tx)
                .insert(room.id, session.user_id)
                .await?;
        }
        RoomRepository::new(&mut tx).set_active(room.id, true).await?;

        let history = HistoryRepository::new(&mut tx)
            .recent(room.id, self.config.join_messages)
            .await?;
        let entered = ChatEntry::entered(&session.user_name);
        if self.config.log_system {
            self.log_system_entry(&mut tx, room.id, &entered).await?;
        }
        tx.commit().await?;

        if let Some(session) = self.sessions.write().await.get_mut(&conn) {
            session.room = Some(RoomRef {
                id: room.id,
                name: room.name.clone(),
            });
        }

        let history = history.into_iter().map(ChatEntry::from).collect();
        self.fanout
            .unicast(ServerEvent::Joined { history }, conn)
            .await;
        self.fanout.subscribe(conn, Group::Room(room.id)).await;

        if let Some(previous) = moved_from {
            self.fanout
                .broadcast(
                    ServerEvent::Message(ChatEntry::left(&session.user_name)),
                    Group::Room(previous.room_id),
                )
                .await;
        }
        self.fanout
            .broadcast(ServerEvent::Message(entered), Group::Room(room.id))
            .await;
        self.broadcast_room_list().await?;

        info!("'{}' joined room '{}'", session.user_name, room.name);
        Ok(())
    }

    /// Move a connection out of its room back to the lobby.
    pub async fn leave(&self, conn: ConnectionId) -> Result<()> {
        let _gate = self.gate.lock().await;
        let session = self.require_session(conn).await?;

        let mut tx = self.db.begin().await?;
        let membership = MembershipRepository::new(&mut tx)
            .get_for_user(session.user_id)
            .await?
            .ok_or(RelayError::NotInRoom)?;
        self.release_membership(&mut tx, &membership, &session.user_name)
            .await?;
        tx.commit().await?;

        if let Some(session) = self.sessions.write().await.get_mut(&conn) {
            session.room = None;
        }

        self.fanout
            .broadcast(
                ServerEvent::Message(ChatEntry::left(&session.user_name)),
                Group::Room(membership.room_id),
            )
            .await;
        self.fanout.subscribe(conn, Group::Lobby).await;
        self.broadcast_room_list().await?;

        info!("'{}' left room '{}'", session.user_name, membership.room_name);
        Ok(())
    }

    /// Tear down a connection. Idempotent.
    ///
    /// An unidentified connection touches no store rows. The session and
    /// its queue are only dropped once the store transaction commits, so a
    /// failed teardown can be retried.
    pub async fn disconnect(&self, conn: ConnectionId) -> Result<()> {
        let _gate = self.gate.lock().await;

        let Some(session) = self.session(conn).await else {
            self.fanout.detach(conn).await;
            debug!("Connection {} closed without a session", conn);
            return Ok(());
        };

        let mut tx = self.db.begin().await?;
        let membership = MembershipRepository::new(&mut tx)
            .get_for_user(session.user_id)
            .await?;
        if let Some(membership) = &membership {
            self.release_membership(&mut tx, membership, &session.user_name)
                .await?;
        }
        UserRepository::new(&mut tx)
            .deactivate(session.user_id)
            .await?;
        tx.commit().await?;

        self.sessions.write().await.remove(&conn);
        self.fanout.detach(conn).await;

        if let Some(membership) = membership {
            self.fanout
                .broadcast(
                    ServerEvent::Message(ChatEntry::left(&session.user_name)),
                    Group::Room(membership.room_id),
                )
                .await;
            self.broadcast_room_list().await?;
        }

        info!("'{}' disconnected ({})", session.user_name, conn);
        Ok(())
    }

    /// Append a message, image or file to the connection's room and
    /// broadcast it to the room.
    pub async fn send(&self, conn: ConnectionId, submission: Submission) -> Result<()> {
        // Checked again under the gate; this only keeps identity errors
        // ahead of payload errors.
        self.require_session(conn).await?;
        match submission {
            Submission::Text(text) => self.append_and_broadcast(conn, Payload::Text(text)).await,
            Submission::Image(data) => {
                AttachmentCodec::decode(&data)?;
                self.append_and_broadcast(conn, Payload::Image(data)).await
            }
            Submission::File { filename, data } => self.send_file(conn, &filename, &data).await,
        }
    }

    async fn append_and_broadcast(&self, conn: ConnectionId, payload: Payload) -> Result<()> {
        let _gate = self.gate.lock().await;
        let session = self.require_session(conn).await?;
        let room = session.room.clone().ok_or(RelayError::NotInRoom)?;

        let mut tx = self.db.begin().await?;
        let mut history = HistoryRepository::new(&mut tx);
        match &payload {
            Payload::Text(text) => {
                history
                    .append_message(room.id, session.user_id, text)
                    .await?;
            }
            Payload::Image(data) => {
                history.append_image(room.id, session.user_id, data).await?;
            }
            Payload::File { .. } | Payload::System(_) => {
                return Err(RelayError::InvalidPayload(
                    "payload cannot be appended inline".to_string(),
                ));
            }
        }
        tx.commit().await?;

        let entry = ChatEntry::new(session.user_name, payload);
        self.fanout
            .broadcast(ServerEvent::Message(entry), Group::Room(room.id))
            .await;
        Ok(())
    }

    /// Two-phase file write: row first, then bytes, then storage details.
    ///
    /// The bytes are written with the gate released. Until `save_name` is
    /// attached the row is invisible to pruning.
    async fn send_file(&self, conn: ConnectionId, filename: &str, data: &str) -> Result<()> {
        let bytes = AttachmentCodec::decode(data)?;
        let filename = sanitize_filename(filename);

        let (session, room, id) = {
            let _gate = self.gate.lock().await;
            let session = self.require_session(conn).await?;
            let room = session.room.clone().ok_or(RelayError::NotInRoom)?;

            let mut tx = self.db.begin().await?;
            let id = HistoryRepository::new(&mut tx)
                .append_file(room.id, session.user_id, &filename)
                .await?;
            tx.commit().await?;
            (session, room, id)
        };

        let save_name = self.codec.store(&bytes, &filename, id).await?;
        let link = AttachmentCodec::download_link(id, &filename);

        let _gate = self.gate.lock().await;
        let mut tx = self.db.begin().await?;
        HistoryRepository::new(&mut tx)
            .attach_file(id, &save_name, &link)
            .await?;
        tx.commit().await?;

        if let Err(e) = self.codec.prune(&self.db).await {
            warn!("Attachment pruning failed: {}", e);
        }

        let entry = ChatEntry::new(
            session.user_name,
            Payload::File {
                filename,
                link: Some(link),
            },
        );
        self.fanout
            .broadcast(ServerEvent::Message(entry), Group::Room(room.id))
            .await;
        Ok(())
    }

    /// Delete a membership, deactivating the room if it becomes empty.
    async fn release_membership(
        &self,
        conn: &mut SqliteConnection,
        membership: &Membership,
        user_name: &str,
    ) -> Result<()> {
        let occupants = MembershipRepository::new(&mut *conn)
            .count_in_room(membership.room_id)
            .await?;
        if occupants <= 1 {
            RoomRepository::new(&mut *conn)
                .set_active(membership.room_id, false)
                .await?;
        }
        MembershipRepository::new(&mut *conn)
            .delete_for_user(membership.user_id)
            .await?;

        if self.config.log_system {
            self.log_system_entry(conn, membership.room_id, &ChatEntry::left(user_name))
                .await?;
        }
        Ok(())
    }

    async fn log_system_entry(
        &self,
        conn: &mut SqliteConnection,
        room_id: i64,
        entry: &ChatEntry,
    ) -> Result<()> {
        if let Some(text) = entry.system_text() {
            HistoryRepository::new(&mut *conn)
                .append_system(room_id, text)
                .await?;
        }
        Ok(())
    }

    async fn broadcast_room_list(&self) -> Result<()> {
        let rooms = RoomRegistry::new(&self.db).list_active_rooms().await?;
        self.fanout
            .broadcast(ServerEvent::Rooms { rooms }, Group::Lobby)
            .await;
        Ok(())
    }

    async fn require_session(&self, conn: ConnectionId) -> Result<Session> {
        self.session(conn).await.ok_or(RelayError::NotIdentified)
    }
}
