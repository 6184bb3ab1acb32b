//! Active room listing for the lobby.

use crate::db::{Database, RoomRepository};
use crate::Result;

use super::RoomInfo;

/// Read-only view over the rooms table.
pub struct RoomRegistry<'a> {
    db: &'a Database,
}

impl<'a> RoomRegistry<'a> {
    /// Create a registry over `db`.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Active rooms with occupant counts, busiest first.
    ///
    /// Queried fresh on every call.
    pub async fn list_active_rooms(&self) -> Result<Vec<RoomInfo>> {
        let mut conn = self.db.pool().acquire().await?;
        let rooms = RoomRepository::new(&mut conn).list_active().await?;

        Ok(rooms
            .into_iter()
            .map(|room| RoomInfo {
                name: room.name,
                count: room.occupants,
            })
            .collect())
    }
}
