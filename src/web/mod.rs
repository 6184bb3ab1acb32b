//! HTTP surface of the chat relay.
//!
//! This module serves the WebSocket event protocol, attachment downloads
//! and a health check.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::{create_health_router, create_router};
pub use server::WebServer;
