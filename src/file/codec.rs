//! Attachment codec.
//!
//! Images and files travel as base64 text, optionally wrapped in a
//! `data:<mime>;base64,` URL. Images are stored encoded in history; file
//! bytes are decoded and written to [`FileStorage`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info, warn};

use crate::db::{Database, HistoryRepository};
use crate::{RelayError, Result};

use super::FileStorage;

/// Encodes, stores and prunes attachments.
#[derive(Debug, Clone)]
pub struct AttachmentCodec {
    storage: FileStorage,
    max_files: u32,
}

impl AttachmentCodec {
    /// Create a codec over `storage` keeping at most `max_files` files.
    pub fn new(storage: FileStorage, max_files: u32) -> Self {
        Self { storage, max_files }
    }

    /// Get the underlying storage.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    /// Retention limit for stored files.
    pub fn max_files(&self) -> u32 {
        self.max_files
    }

    /// Decode a transport-encoded payload into raw bytes.
    pub fn decode(encoded: &str) -> Result<Vec<u8>> {
        let data = match encoded.strip_prefix("data:") {
            Some(url) => match url.split_once(',') {
                Some((header, body)) if header.ends_with(";base64") => body,
                _ => {
                    return Err(RelayError::InvalidPayload(
                        "data URL is not base64".to_string(),
                    ))
                }
            },
            None => encoded,
        };

        STANDARD
            .decode(data.trim())
            .map_err(|e| RelayError::InvalidPayload(e.to_string()))
    }

    /// Encode raw bytes for transport.
    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Link under which a stored file is downloadable.
    ///
    /// The filename segment is percent-encoded.
    pub fn download_link(history_id: i64, filename: &str) -> String {
        format!("/files/{}/{}", history_id, urlencoding::encode(filename))
    }

    /// Write file bytes and return their storage handle.
    ///
    /// `filename` must already be sanitized.
    pub async fn store(&self, bytes: &[u8], filename: &str, history_id: i64) -> Result<String> {
        let save_name = format!("{history_id}_{filename}");
        self.storage.save(&save_name, bytes).await?;
        debug!("Stored {} bytes as {}", bytes.len(), save_name);
        Ok(save_name)
    }

    /// Read file bytes by storage handle.
    pub async fn fetch(&self, save_name: &str) -> Result<Vec<u8>> {
        self.storage.load(save_name).await
    }

    /// Remove the oldest stored files beyond the retention limit.
    ///
    /// Bytes are removed before the row. A failed byte removal is logged and
    /// the row is deleted regardless. Returns the number of rows removed.
    pub async fn prune(&self, db: &Database) -> Result<usize> {
        let mut tx = db.begin().await?;
        let mut repo = HistoryRepository::new(&mut tx);

        let files = repo.stored_files().await?;
        let surplus = files.len().saturating_sub(self.max_files as usize);
        if surplus == 0 {
            return Ok(0);
        }

        for file in files.into_iter().take(surplus) {
            if let Some(save_name) = file.save_name.as_deref() {
                match self.storage.delete(save_name).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Pruned file {} was already missing", save_name),
                    Err(e) => warn!("Failed to remove pruned file {}: {}", save_name, e),
                }
            }
            repo.delete_file(file.id).await?;
        }

        tx.commit().await?;
        info!("Pruned {} attachment(s) over the limit of {}", surplus, self.max_files);
        Ok(surplus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{RoomRepository, UserRepository};
    use tempfile::TempDir;

    fn setup_codec(max_files: u32) -> (TempDir, AttachmentCodec) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        (temp_dir, AttachmentCodec::new(storage, max_files))
    }

    #[test]
    fn test_decode_plain_base64() {
        assert_eq!(AttachmentCodec::decode("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_data_url() {
        let bytes = AttachmentCodec::decode("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            AttachmentCodec::decode("not base64!!"),
            Err(RelayError::InvalidPayload(_))
        ));
        assert!(matches!(
            AttachmentCodec::decode("data:text/plain,hello"),
            Err(RelayError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_download_link() {
        assert_eq!(AttachmentCodec::download_link(7, "a.txt"), "/files/7/a.txt");
        assert_eq!(
            AttachmentCodec::download_link(8, "my notes.txt"),
            "/files/8/my%20notes.txt"
        );
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let (_temp_dir, codec) = setup_codec(5);

        let save_name = codec.store(b"payload", "notes.txt", 3).await.unwrap();
        assert_eq!(save_name, "3_notes.txt");
        assert_eq!(codec.fetch(&save_name).await.unwrap(), b"payload");
        assert!(matches!(
            codec.fetch("4_missing.txt").await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_removes_oldest_surplus() {
        let (_temp_dir, codec) = setup_codec(2);
        let db = Database::open_in_memory().await.unwrap();

        let mut ids = Vec::new();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            let user = UserRepository::new(&mut conn).create("alice", "c1").await.unwrap();
            let room = RoomRepository::new(&mut conn).get_or_create("r").await.unwrap();
            for i in 0..3 {
                let filename = format!("f{i}.bin");
                let id = HistoryRepository::new(&mut conn)
                    .append_file(room.id, user.id, &filename)
                    .await
                    .unwrap();
                let save_name = codec.store(b"x", &filename, id).await.unwrap();
                let link = AttachmentCodec::download_link(id, &filename);
                HistoryRepository::new(&mut conn)
                    .attach_file(id, &save_name, &link)
                    .await
                    .unwrap();
                ids.push((id, save_name));
            }
        }

        assert_eq!(codec.prune(&db).await.unwrap(), 1);
        assert_eq!(codec.prune(&db).await.unwrap(), 0);

        let mut conn = db.pool().acquire().await.unwrap();
        let mut repo = HistoryRepository::new(&mut conn);
        assert!(repo.get_file(ids[0].0).await.unwrap().is_none());
        assert!(!codec.storage().exists(&ids[0].1));
        for (id, save_name) in &ids[1..] {
            assert!(repo.get_file(*id).await.unwrap().is_some());
            assert!(codec.storage().exists(save_name));
        }
    }

    #[tokio::test]
    async fn test_prune_tolerates_missing_bytes() {
        let (_temp_dir, codec) = setup_codec(0);
        let db = Database::open_in_memory().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::new(&mut conn).create("alice", "c1").await.unwrap();
        let room = RoomRepository::new(&mut conn).get_or_create("r").await.unwrap();
        let id = HistoryRepository::new(&mut conn)
            .append_file(room.id, user.id, "gone.bin")
            .await
            .unwrap();
        HistoryRepository::new(&mut conn)
            .attach_file(id, "1_gone.bin", "/files/1/gone.bin")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(codec.prune(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_ignores_pending_uploads() {
        let (_temp_dir, codec) = setup_codec(1);
        let db = Database::open_in_memory().await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let user = UserRepository::new(&mut conn).create("alice", "c1").await.unwrap();
        let room = RoomRepository::new(&mut conn).get_or_create("r").await.unwrap();
        let stored = HistoryRepository::new(&mut conn)
            .append_file(room.id, user.id, "done.bin")
            .await
            .unwrap();
        HistoryRepository::new(&mut conn)
            .attach_file(stored, "1_done.bin", "/files/1/done.bin")
            .await
            .unwrap();
        let pending = HistoryRepository::new(&mut conn)
            .append_file(room.id, user.id, "uploading.bin")
            .await
            .unwrap();
        drop(conn);

        assert_eq!(codec.prune(&db).await.unwrap(), 0);

        let mut conn = db.pool().acquire().await.unwrap();
        let mut repo = HistoryRepository::new(&mut conn);
        assert!(repo.get_file(stored).await.unwrap().is_some());
        assert!(repo.get_file(pending).await.unwrap().is_some());
    }
}
