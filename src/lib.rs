//! Chatrelay - room-based real-time chat relay.
//!
//! Clients connect over WebSocket, claim a unique display name, and move
//! between named rooms. Messages, images and files are persisted in SQLite
//! and fanned out to the room's occupants.

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;
pub mod web;

pub use chat::SessionCoordinator;
pub use config::Config;
pub use db::Database;
pub use error::{ErrorClass, RelayError, Result};
pub use web::WebServer;
