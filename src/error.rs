//! Error types for the chat relay.

use thiserror::Error;

/// How an error is reported to the connection that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or malformed field, or an event that is invalid in the
    /// connection's current state.
    Protocol,
    /// Collides with state owned by someone else (active name, reserved room).
    Conflict,
    /// The referenced room, user or history row does not exist.
    NotFound,
    /// Transaction or disk failure. Rolled back, reported like a conflict.
    Storage,
}

/// Common error type for the chat relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// `connect` without a usable name.
    #[error("name is required")]
    NameRequired,

    /// Another connection currently owns this name.
    #[error("name '{0}' is already in use")]
    NameAlreadyActive(String),

    /// The reserved lobby name was used as a room name.
    #[error("room name '{0}' is reserved")]
    ReservedRoomName(String),

    /// `join` without a usable room name.
    #[error("room name is required")]
    RoomNameRequired,

    /// The connection has no active room.
    #[error("not in a room")]
    NotInRoom,

    /// Room lookup by name failed.
    #[error("room '{0}' does not exist")]
    UnknownRoom(String),

    /// An event other than `connect` arrived before `connect`.
    #[error("connection is not identified")]
    NotIdentified,

    /// `connect` arrived twice on the same connection.
    #[error("connection is already identified")]
    AlreadyIdentified,

    /// Attachment payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Classify the error for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::NameRequired
            | RelayError::RoomNameRequired
            | RelayError::NotIdentified
            | RelayError::AlreadyIdentified
            | RelayError::InvalidPayload(_) => ErrorClass::Protocol,
            RelayError::NameAlreadyActive(_) | RelayError::ReservedRoomName(_) => {
                ErrorClass::Conflict
            }
            RelayError::NotInRoom | RelayError::UnknownRoom(_) | RelayError::NotFound(_) => {
                ErrorClass::NotFound
            }
            RelayError::Database(_) | RelayError::Io(_) | RelayError::Config(_) => {
                ErrorClass::Storage
            }
        }
    }

    /// Whether the offending connection must be closed after the error
    /// event is delivered.
    pub fn terminates_connection(&self) -> bool {
        !matches!(self.class(), ErrorClass::NotFound)
    }

    /// Stable machine-readable code sent in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::NameRequired => "name_required",
            RelayError::NameAlreadyActive(_) => "name_already_active",
            RelayError::ReservedRoomName(_) => "reserved_room_name",
            RelayError::RoomNameRequired => "room_name_required",
            RelayError::NotInRoom => "not_in_room",
            RelayError::UnknownRoom(_) => "unknown_room",
            RelayError::NotIdentified => "not_identified",
            RelayError::AlreadyIdentified => "already_identified",
            RelayError::InvalidPayload(_) => "invalid_payload",
            RelayError::NotFound(_) => "not_found",
            RelayError::Database(_) | RelayError::Io(_) | RelayError::Config(_) => {
                "storage_error"
            }
        }
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for RelayError {
    fn from(e: sqlx::Error) -> Self {
        RelayError::Database(e.to_string())
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
