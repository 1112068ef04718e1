use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_core::UserId;
use thiserror::Error;

use crate::{Mode, Role, SongCard};

mod memory;
pub use memory::*;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache couldn't be reached
    #[error("Cache is unavailable: {0}")]
    Unavailable(String),
}

/// A member that currently has a connection to a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineMember {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub mode: Mode,
    pub can_control: bool,
    /// Unix milliseconds
    pub joined_at: i64,
}

/// The authoritative playback of a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlaybackState {
    pub current_index: Option<u32>,
    pub current_song: Option<SongCard>,
    /// In seconds
    pub position: f64,
    pub is_playing: bool,
    /// Unix milliseconds
    pub updated_at: i64,
    pub updated_by: UserId,
    pub updated_by_name: String,
    /// Increases by one with every accepted song change, never reused
    pub state_version: u64,
}

impl RoomPlaybackState {
    pub fn song_id(&self) -> Option<i64> {
        self.current_song.as_ref().map(|s| s.id)
    }
}

/// Ephemeral room state: who is online, what is playing, and the shared playlist.
///
/// The store is passive, all decisions are made by the room manager.
#[async_trait]
pub trait RoomCache: Send + Sync {
    /// Online members, in the order they joined
    async fn online_members(&self, room_id: &str) -> CacheResult<Vec<OnlineMember>>;
    async fn online_member(&self, room_id: &str, user_id: UserId)
        -> CacheResult<Option<OnlineMember>>;
    async fn set_online_member(&self, room_id: &str, member: OnlineMember) -> CacheResult<()>;
    async fn remove_online_member(&self, room_id: &str, user_id: UserId) -> CacheResult<()>;

    async fn playback(&self, room_id: &str) -> CacheResult<Option<RoomPlaybackState>>;
    /// Writes the state only if the stored version equals `expected_version`,
    /// with a missing state counting as version 0. Returns whether it was written.
    async fn compare_and_set_playback(
        &self,
        room_id: &str,
        expected_version: u64,
        state: RoomPlaybackState,
    ) -> CacheResult<bool>;

    async fn playlist(&self, room_id: &str) -> CacheResult<Option<Vec<SongCard>>>;
    async fn set_playlist(&self, room_id: &str, songs: Vec<SongCard>) -> CacheResult<()>;

    /// Forgets everything about a room
    async fn clear_room(&self, room_id: &str) -> CacheResult<()>;
}
