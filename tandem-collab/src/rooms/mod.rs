mod chat;
mod locks;
mod members;
mod playback;


use std::sync::Arc;

use log::{debug, info, warn};
use tandem_core::{CloseReason, ConnectionHandle, Registration, UserId};
use thiserror::Error;

pub use locks::*;

use crate::{
    protocol::*, util::random_string, CacheError, CollabContext, DatabaseError, NewRoom,
    OnlineMember, RoomData, RoomMemberData, RoomPlaybackState, UserData,
};

pub type RoomMessage = Arc<ServerMessage>;

/// Runs the rooms: membership, permissions, chat, and playback sync.
pub struct RoomManager {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room does not exist or is closed")]
    RoomNotFound,
    #[error("User is not a member of this room")]
    MemberNotFound,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Room is full")]
    Capacity,
    /// The playback changed since the client last saw it
    #[error("Playback state has changed")]
    Conflict {
        current: Option<Box<RoomPlaybackState>>,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RoomError {
    /// The error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "room_not_found",
            Self::MemberNotFound => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Capacity => "room_full",
            Self::Conflict { .. } => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::Database(_) | Self::Cache(_) => "internal",
        }
    }

    fn room_lookup(error: DatabaseError) -> Self {
        if error.is_not_found() {
            return Self::RoomNotFound;
        }

        Self::Database(error)
    }

    fn member_lookup(error: DatabaseError) -> Self {
        if error.is_not_found() {
            return Self::MemberNotFound;
        }

        Self::Database(error)
    }

    fn conflict(current: Option<RoomPlaybackState>) -> Self {
        Self::Conflict {
            current: current.map(Box::new),
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;

/// A user's live presence in a room, returned by a successful join.
#[derive(Debug)]
pub struct RoomSession {
    pub registration: Registration<RoomMessage>,
    pub member: OnlineMember,
}

/// A room and who is in it right now
#[derive(Debug, Clone)]
pub struct RoomDetails {
    pub room: RoomData,
    pub online: Vec<OnlineMember>,
}

impl RoomManager {
    const CREATE_ATTEMPTS: usize = 3;

    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a room owned by `owner`
    pub async fn create_room(
        &self,
        owner: &UserData,
        name: &str,
        max_members: Option<u32>,
    ) -> RoomResult<RoomData> {
        let name = name.trim();

        if name.is_empty() {
            return Err(RoomError::BadRequest("Room name can't be empty".to_string()));
        }

        let config = &self.context.config;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let new_room = NewRoom {
                id: random_string(config.room_id_length),
                name: name.to_string(),
                owner_id: owner.id,
                max_members: config.room_capacity(max_members),
            };

            match self.context.database.create_room(new_room).await {
                Ok(room) => {
                    info!("User {} created room {} ({})", owner.id, room.id, room.name);
                    return Ok(room);
                }
                Err(DatabaseError::Conflict { .. }) if attempt < Self::CREATE_ATTEMPTS => {
                    debug!("Room id collision, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Returns an active room along with its online members
    pub async fn room(&self, room_id: &str) -> RoomResult<RoomDetails> {
        let room = self
            .context
            .database
            .room_by_id(room_id)
            .await
            .map_err(RoomError::room_lookup)?;

        let online = self.context.cache.online_members(room_id).await?;

        Ok(RoomDetails { room, online })
    }

    /// Handles a frame from a connected member.
    /// Failures are answered privately, the connection stays open.
    pub async fn handle_message(&self, handle: &ConnectionHandle, message: ClientMessage) {
        let room_id = &handle.room_id;
        let user_id = handle.user_id;

        if let Err(err) = self.dispatch(room_id, user_id, message).await {
            match &err {
                RoomError::Database(_) | RoomError::Cache(_) => {
                    warn!("Failed handling message from {} in {}: {}", user_id, room_id, err)
                }
                _ => debug!("Rejected message from {} in {}: {}", user_id, room_id, err),
            }

            let message = self.error_message(room_id, &err);
            self.context.hub.send_to(room_id, user_id, message);
        }
    }

    /// Applies a frame from a member of a room
    pub async fn dispatch(
        &self,
        room_id: &str,
        user_id: UserId,
        message: ClientMessage,
    ) -> RoomResult<()> {
        if let ClientMessage::Leave = message {
            return self.leave(room_id, user_id).await;
        }

        let actor = self.actor(room_id, user_id).await?;

        match message {
            ClientMessage::Join => self.resync(room_id, &actor).await,
            ClientMessage::Leave => Ok(()),
            ClientMessage::Chat(payload) => {
                self.post_message(room_id, &actor, payload, crate::MessageType::Text)
                    .await
            }
            ClientMessage::SongAdd(payload) => {
                self.post_message(room_id, &actor, payload, crate::MessageType::SongAdd)
                    .await
            }
            ClientMessage::SongSearch(payload) => {
                self.post_message(room_id, &actor, payload, crate::MessageType::SongSearch)
                    .await
            }
            ClientMessage::SongPlay(payload) => self.song_play(room_id, &actor, payload),
            ClientMessage::Playlist(payload) => self.set_playlist(room_id, &actor, payload).await,
            ClientMessage::PlaylistReorder(payload) => {
                self.reorder_playlist(room_id, &actor, payload).await
            }
            ClientMessage::ModeSync(payload) => {
                self.switch_mode(room_id, &actor, payload.mode).await
            }
            ClientMessage::TransferOwner(payload) => {
                self.transfer_owner(room_id, &actor, payload.user_id).await
            }
            ClientMessage::GrantControl(payload) => {
                self.grant_control(room_id, &actor, payload.user_id, payload.can_control)
                    .await
            }
            ClientMessage::RoleUpdate(payload) => {
                self.update_role(room_id, &actor, payload.user_id, payload.role)
                    .await
            }
            ClientMessage::MasterReport(report) => self.report(room_id, &actor, report).await,
            ClientMessage::MasterRequest => self.master_request(room_id, &actor).await,
            ClientMessage::MasterMode(payload) => self.master_mode(room_id, &actor, payload),
            ClientMessage::RoomDisband => self.disband(room_id, actor.user_id).await,
            ClientMessage::Ping => {
                self.send_to(room_id, user_id, None, ServerEvent::Pong);
                Ok(())
            }
            ClientMessage::Pong => Ok(()),
        }
    }

    /// Closes a room for good. Only the owner can do this.
    pub async fn disband(&self, room_id: &str, user_id: UserId) -> RoomResult<()> {
        let member = self.active_member(room_id, user_id).await?;

        if member.role != crate::Role::Owner {
            return Err(RoomError::Forbidden("Only the owner can disband the room"));
        }

        self.close_room(room_id, Some(user_id)).await?;
        info!("User {} disbanded room {}", user_id, room_id);

        Ok(())
    }

    /// Closes a room, tells everyone, and forgets its ephemeral state
    async fn close_room(&self, room_id: &str, closed_by: Option<UserId>) -> RoomResult<()> {
        let context = &self.context;

        context
            .database
            .close_room(room_id)
            .await
            .map_err(RoomError::room_lookup)?;

        self.broadcast(room_id, closed_by, ServerEvent::RoomDisband, &[]);
        context.cache.clear_room(room_id).await?;

        let closed = context.hub.close_room(room_id, CloseReason::RoomDisbanded);
        context.locks.forget(room_id);

        info!("Room {} closed, {} connection(s) dropped", room_id, closed);
        Ok(())
    }

    /// The online member sending a frame
    async fn actor(&self, room_id: &str, user_id: UserId) -> RoomResult<OnlineMember> {
        self.context
            .cache
            .online_member(room_id, user_id)
            .await?
            .ok_or(RoomError::MemberNotFound)
    }

    async fn active_member(&self, room_id: &str, user_id: UserId) -> RoomResult<RoomMemberData> {
        let member = self
            .context
            .database
            .member(room_id, user_id)
            .await
            .map_err(RoomError::member_lookup)?;

        if !member.is_active() {
            return Err(RoomError::MemberNotFound);
        }

        Ok(member)
    }

    fn message(&self, room_id: &str, user_id: Option<UserId>, event: ServerEvent) -> RoomMessage {
        Arc::new(ServerMessage::new(room_id, user_id, event))
    }

    fn broadcast(
        &self,
        room_id: &str,
        user_id: Option<UserId>,
        event: ServerEvent,
        exclude: &[UserId],
    ) -> usize {
        let message = self.message(room_id, user_id, event);
        self.context.hub.broadcast(room_id, message, exclude)
    }

    fn send_to(
        &self,
        room_id: &str,
        recipient: UserId,
        user_id: Option<UserId>,
        event: ServerEvent,
    ) -> bool {
        let message = self.message(room_id, user_id, event);
        self.context.hub.send_to(room_id, recipient, message)
    }

    fn send_to_many(
        &self,
        room_id: &str,
        recipients: &[UserId],
        user_id: Option<UserId>,
        event: ServerEvent,
    ) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let message = self.message(room_id, user_id, event);
        self.context.hub.send_to_many(room_id, recipients, message)
    }

    async fn broadcast_member_list(&self, room_id: &str) -> RoomResult<()> {
        let members = self.context.cache.online_members(room_id).await?;
        self.broadcast(
            room_id,
            None,
            ServerEvent::MemberList(MemberListPayload { members }),
            &[],
        );

        Ok(())
    }

    /// The snapshot sent to listeners
    fn snapshot(&self, state: Option<&RoomPlaybackState>) -> MasterSync {
        let interval = self.context.config.report_interval.as_millis() as u64;
        MasterSync::from_state(state, interval)
    }

    fn error_message(&self, room_id: &str, error: &RoomError) -> RoomMessage {
        let current_state = match error {
            RoomError::Conflict { current } => Some(self.snapshot(current.as_deref())),
            _ => None,
        };

        let payload = ErrorPayload {
            code: error.code(),
            message: error.to_string(),
            current_state,
        };

        self.message(room_id, None, ServerEvent::Error(payload))
    }
}
