use std::sync::Arc;

use dashmap::DashMap;
use tandem_core::RoomId;
use tokio::sync::Mutex;

pub type RoomLock = Arc<Mutex<()>>;

/// Per room locks. Rooms never share a lock.
#[derive(Debug, Default)]
pub struct RoomLocks {
    membership: DashMap<RoomId, RoomLock>,
    playback: DashMap<RoomId, RoomLock>,
}

impl RoomLocks {
    /// Serializes joins and leaves of a room
    pub fn membership(&self, room_id: &str) -> RoomLock {
        Self::get_or_create(&self.membership, room_id)
    }

    /// Serializes writes to a room's playback state
    pub fn playback(&self, room_id: &str) -> RoomLock {
        Self::get_or_create(&self.playback, room_id)
    }

    /// Drops the locks of a closed room. Holders keep theirs until released.
    pub fn forget(&self, room_id: &str) {
        self.membership.remove(room_id);
        self.playback.remove(room_id);
    }

    fn get_or_create(locks: &DashMap<RoomId, RoomLock>, room_id: &str) -> RoomLock {
        // The map guard is dropped before anyone awaits the lock
        locks.entry(room_id.to_string()).or_default().clone()
    }
}
