//! WebSocket transport for the chat event protocol.

pub mod chat;

pub use chat::chat_ws_handler;
