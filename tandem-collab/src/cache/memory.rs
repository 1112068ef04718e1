use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tandem_core::{RoomId, UserId};

use crate::SongCard;

use super::{CacheResult, OnlineMember, RoomCache, RoomPlaybackState};

/// A process local [RoomCache]
#[derive(Default)]
pub struct MemoryCache {
    members: DashMap<RoomId, Vec<OnlineMember>>,
    playback: DashMap<RoomId, RoomPlaybackState>,
    playlists: DashMap<RoomId, Vec<SongCard>>,
}

#[async_trait]
impl RoomCache for MemoryCache {
    async fn online_members(&self, room_id: &str) -> CacheResult<Vec<OnlineMember>> {
        Ok(self
            .members
            .get(room_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn online_member(
        &self,
        room_id: &str,
        user_id: UserId,
    ) -> CacheResult<Option<OnlineMember>> {
        Ok(self
            .members
            .get(room_id)
            .and_then(|m| m.iter().find(|m| m.user_id == user_id).cloned()))
    }

    async fn set_online_member(&self, room_id: &str, member: OnlineMember) -> CacheResult<()> {
        let mut members = self.members.entry(room_id.to_string()).or_default();

        match members.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }

        Ok(())
    }

    async fn remove_online_member(&self, room_id: &str, user_id: UserId) -> CacheResult<()> {
        if let Some(mut members) = self.members.get_mut(room_id) {
            members.retain(|m| m.user_id != user_id);
        }

        self.members.remove_if(room_id, |_, m| m.is_empty());
        Ok(())
    }

    async fn playback(&self, room_id: &str) -> CacheResult<Option<RoomPlaybackState>> {
        Ok(self.playback.get(room_id).map(|s| s.clone()))
    }

    async fn compare_and_set_playback(
        &self,
        room_id: &str,
        expected_version: u64,
        state: RoomPlaybackState,
    ) -> CacheResult<bool> {
        match self.playback.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state_version != expected_version {
                    return Ok(false);
                }

                entry.insert(state);
            }
            Entry::Vacant(entry) => {
                if expected_version != 0 {
                    return Ok(false);
                }

                entry.insert(state);
            }
        }

        Ok(true)
    }

    async fn playlist(&self, room_id: &str) -> CacheResult<Option<Vec<SongCard>>> {
        Ok(self.playlists.get(room_id).map(|p| p.clone()))
    }

    async fn set_playlist(&self, room_id: &str, songs: Vec<SongCard>) -> CacheResult<()> {
        self.playlists.insert(room_id.to_string(), songs);
        Ok(())
    }

    async fn clear_room(&self, room_id: &str) -> CacheResult<()> {
        self.members.remove(room_id);
        self.playback.remove(room_id);
        self.playlists.remove(room_id);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(version: u64) -> RoomPlaybackState {
        RoomPlaybackState {
            state_version: version,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_the_version() {
        let cache = MemoryCache::default();

        assert!(!cache.compare_and_set_playback("a", 3, state(4)).await.unwrap());
        assert!(cache.compare_and_set_playback("a", 0, state(1)).await.unwrap());
        assert!(!cache.compare_and_set_playback("a", 0, state(1)).await.unwrap());
        assert!(cache.compare_and_set_playback("a", 1, state(2)).await.unwrap());

        let stored = cache.playback("a").await.unwrap().unwrap();
        assert_eq!(stored.state_version, 2);
    }

    #[tokio::test]
    async fn test_clear_room_forgets_everything() {
        let cache = MemoryCache::default();

        cache.set_playlist("a", vec![]).await.unwrap();
        cache.compare_and_set_playback("a", 0, state(1)).await.unwrap();
        cache.clear_room("a").await.unwrap();

        assert!(cache.playback("a").await.unwrap().is_none());
        assert!(cache.playlist("a").await.unwrap().is_none());
    }
}
