use log::debug;
use tandem_core::UserId;

use crate::{protocol::*, util::normalize_content, MessageType, NewMessage, OnlineMember};

use super::{RoomError, RoomManager, RoomResult};

impl RoomManager {
    /// Persists a chat message and sends it to everyone in the room, the author included
    pub(super) async fn post_message(
        &self,
        room_id: &str,
        author: &OnlineMember,
        payload: ChatPayload,
        message_type: MessageType,
    ) -> RoomResult<()> {
        let max_length = self.context.config.max_message_length;

        let content = normalize_content(&payload.content, max_length).ok_or_else(|| {
            RoomError::BadRequest(format!(
                "Message can't be longer than {} characters",
                max_length
            ))
        })?;

        if content.is_empty() && payload.songs.is_empty() {
            return Err(RoomError::BadRequest("Message can't be empty".to_string()));
        }

        let message = self
            .context
            .database
            .create_message(NewMessage {
                room_id: room_id.to_string(),
                user_id: author.user_id,
                content: content.to_string(),
                message_type,
                songs: payload.songs,
            })
            .await?;

        let mut message = ChatMessage::from(message);

        if message.username.is_empty() {
            message.username = author.username.clone();
        }

        let event = match message_type {
            MessageType::SongAdd => ServerEvent::SongAdd(message),
            MessageType::SongSearch => ServerEvent::SongSearch(message),
            MessageType::Text | MessageType::System => ServerEvent::Chat(message),
        };

        self.broadcast(room_id, Some(author.user_id), event, &[]);
        Ok(())
    }

    /// Relays an advisory "play this" to the rest of the room
    pub(super) fn song_play(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        payload: SongPlayPayload,
    ) -> RoomResult<()> {
        require_control(actor)?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::SongPlay(payload),
            &[actor.user_id],
        );

        Ok(())
    }

    /// Replaces the shared playlist
    pub(super) async fn set_playlist(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        payload: PlaylistPayload,
    ) -> RoomResult<()> {
        require_control(actor)?;

        self.context
            .cache
            .set_playlist(room_id, payload.songs.clone())
            .await?;

        debug!(
            "User {} shared a playlist of {} song(s) in room {}",
            actor.user_id,
            payload.songs.len(),
            room_id
        );

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::Playlist(payload),
            &[actor.user_id],
        );

        Ok(())
    }

    /// Moves a song within the shared playlist
    pub(super) async fn reorder_playlist(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        payload: ReorderPayload,
    ) -> RoomResult<()> {
        require_control(actor)?;

        let cache = &self.context.cache;
        let mut songs = cache
            .playlist(room_id)
            .await?
            .ok_or_else(|| RoomError::BadRequest("There is no playlist to reorder".to_string()))?;

        if payload.from >= songs.len() || payload.to >= songs.len() {
            return Err(RoomError::BadRequest(format!(
                "Playlist positions must be below {}",
                songs.len()
            )));
        }

        let song = songs.remove(payload.from);
        songs.insert(payload.to, song);

        cache.set_playlist(room_id, songs).await?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::PlaylistReorder(payload),
            &[actor.user_id],
        );

        Ok(())
    }

    /// A controller announces it starts or stops acting as the master
    pub(super) fn master_mode(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        payload: MasterModePayload,
    ) -> RoomResult<()> {
        require_control(actor)?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::MasterMode(payload),
            &[actor.user_id],
        );

        Ok(())
    }

    /// A page of a room's history, oldest first.
    /// `offset` counts back from the newest message.
    pub async fn messages(
        &self,
        room_id: &str,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> RoomResult<Vec<ChatMessage>> {
        let context = &self.context;

        context
            .database
            .room_by_id(room_id)
            .await
            .map_err(RoomError::room_lookup)?;

        match self.active_member(room_id, user_id).await {
            Ok(_) => {}
            Err(RoomError::MemberNotFound) => {
                return Err(RoomError::Forbidden("Only members can read the history"))
            }
            Err(err) => return Err(err),
        }

        let limit = limit.clamp(1, context.config.history_page_limit.max(1));

        let mut messages: Vec<ChatMessage> = context
            .database
            .messages(room_id, limit, offset)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        messages.reverse();
        Ok(messages)
    }
}

pub(super) fn require_control(actor: &OnlineMember) -> RoomResult<()> {
    if !actor.can_control {
        return Err(RoomError::Forbidden("You don't have control of this room"));
    }

    Ok(())
}
