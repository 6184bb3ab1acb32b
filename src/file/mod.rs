//! Attachment handling for the chat relay.
//!
//! This module provides:
//! - Transport encoding/decoding of image and file payloads
//! - Flat on-disk storage of attachment bytes
//! - Pruning of the oldest attachments beyond the retention limit

mod codec;
mod storage;

pub use codec::AttachmentCodec;
pub use storage::{sanitize_filename, FileStorage};

/// Maximum length for a stored filename (in characters).
pub const MAX_FILENAME_LENGTH: usize = 100;
