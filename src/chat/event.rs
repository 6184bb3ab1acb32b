//! Chat event types exchanged with clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{HistoryKind, HistoryRecord, SYSTEM_USER};

/// Identifier of a live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Claim a display name.
    Connect {
        /// Requested name.
        #[serde(default)]
        name: Option<String>,
    },
    /// Join (and create if needed) a room.
    Join {
        /// Room name.
        #[serde(default)]
        room: Option<String>,
    },
    /// Leave the current room.
    Leave,
    /// Send a text message.
    Message {
        /// Message text.
        text: String,
    },
    /// Send an inline image.
    Image {
        /// Transport-encoded image.
        data: String,
    },
    /// Send a file attachment.
    File {
        /// Original filename.
        filename: String,
        /// Transport-encoded content.
        data: String,
    },
    /// Close the session.
    Disconnect,
    /// Heartbeat ping.
    Ping,
}

/// Content of a chat entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain text.
    Text(String),
    /// Transport-encoded image.
    Image(String),
    /// File attachment. `link` is absent until the bytes are stored.
    File {
        /// Sanitized filename.
        filename: String,
        /// Download link.
        link: Option<String>,
    },
    /// Server-generated notification.
    System(String),
}

/// A single message as delivered live or in a history batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "EntryBody")]
pub struct ChatEntry {
    /// Sender name.
    pub user: String,
    /// Content.
    pub payload: Payload,
}

impl ChatEntry {
    /// Create an entry sent by a user.
    pub fn new(user: impl Into<String>, payload: Payload) -> Self {
        Self {
            user: user.into(),
            payload,
        }
    }

    /// Create a system notification.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(SYSTEM_USER, Payload::System(text.into()))
    }

    /// Notification that `name` entered the room.
    pub fn entered(name: &str) -> Self {
        Self::system(format!("{name} has entered the room."))
    }

    /// Notification that `name` left the room.
    pub fn left(name: &str) -> Self {
        Self::system(format!("{name} has left the room."))
    }

    /// Text of a system notification.
    pub fn system_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::System(text) => Some(text),
            _ => None,
        }
    }
}

impl From<HistoryRecord> for ChatEntry {
    fn from(record: HistoryRecord) -> Self {
        let payload = match record.kind {
            HistoryKind::Message if record.user_name == SYSTEM_USER => {
                Payload::System(record.body)
            }
            HistoryKind::Message => Payload::Text(record.body),
            HistoryKind::Image => Payload::Image(record.body),
            HistoryKind::File => Payload::File {
                filename: record.body,
                link: record.link,
            },
        };
        Self::new(record.user_name, payload)
    }
}

/// Wire shape of a [`ChatEntry`].
#[derive(Serialize)]
struct EntryBody {
    user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

impl From<ChatEntry> for EntryBody {
    fn from(entry: ChatEntry) -> Self {
        let mut body = EntryBody {
            user: entry.user,
            message: None,
            image: None,
            filename: None,
            link: None,
        };
        match entry.payload {
            Payload::Text(text) | Payload::System(text) => body.message = Some(text),
            Payload::Image(image) => body.image = Some(image),
            Payload::File { filename, link } => {
                body.filename = Some(filename);
                body.link = link;
            }
        }
        body
    }
}

/// Entry of the lobby room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    /// Room name.
    pub name: String,
    /// Number of occupants.
    pub count: i64,
}

/// Events sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Active rooms, busiest first.
    Rooms {
        /// Room list.
        rooms: Vec<RoomInfo>,
    },
    /// Recent history of the joined room, oldest first.
    Joined {
        /// History batch.
        history: Vec<ChatEntry>,
    },
    /// Live chat message or notification.
    Message(ChatEntry),
    /// Error report.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
    /// Heartbeat pong response.
    Pong,
}

impl ServerEvent {
    /// Create an error event.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
