//! Physical attachment storage.
//!
//! Files are kept flat under a base directory, named by the caller.
//! Names containing path components are rejected.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::{RelayError, Result};

use super::MAX_FILENAME_LENGTH;

/// File storage service for managing stored attachment bytes.
#[derive(Debug, Clone)]
pub struct FileStorage {
    /// Base directory for file storage.
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write content under `stored_name`, replacing any existing file.
    pub async fn save(&self, stored_name: &str, content: &[u8]) -> Result<()> {
        let file_path = self.get_file_path(stored_name)?;
        fs::write(&file_path, content).await?;
        Ok(())
    }

    /// Load content from storage.
    pub async fn load(&self, stored_name: &str) -> Result<Vec<u8>> {
        let file_path = self.get_file_path(stored_name)?;

        match fs::read(&file_path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RelayError::NotFound(format!("file {stored_name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a file from storage.
    ///
    /// Returns `true` if the file was deleted, `false` if it didn't exist.
    pub async fn delete(&self, stored_name: &str) -> Result<bool> {
        let file_path = self.get_file_path(stored_name)?;

        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a file exists in storage.
    pub fn exists(&self, stored_name: &str) -> bool {
        self.get_file_path(stored_name)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Resolve a stored name to a path inside the base directory.
    fn get_file_path(&self, stored_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(stored_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.base_path.join(stored_name)),
            _ => Err(RelayError::InvalidPayload(format!(
                "invalid stored name: {stored_name}"
            ))),
        }
    }
}

/// Make a client-supplied filename safe to use as a path component.
///
/// Control characters and path separators are replaced, leading dots are
/// stripped and the result is truncated. Returns `"file"` if nothing usable
/// remains.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = cleaned.trim().trim_start_matches('.');
    let truncated: String = trimmed.chars().take(MAX_FILENAME_LENGTH).collect();

    if truncated.trim().is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}
