//! HTTP handlers.

pub mod file;

pub use file::download_file;

use std::sync::Arc;

use crate::chat::SessionCoordinator;

/// Shared state for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session coordinator, which also owns the database and attachments.
    pub coordinator: Arc<SessionCoordinator>,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl AppState {
    /// Create a new application state.
    pub fn new(coordinator: Arc<SessionCoordinator>, max_message_size: usize) -> Self {
        Self {
            coordinator,
            max_message_size,
        }
    }
}
