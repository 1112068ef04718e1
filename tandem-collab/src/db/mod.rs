use async_trait::async_trait;
use tandem_core::{RoomId, UserId};
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Stores rooms, their members, and their chat history.
#[async_trait]
pub trait Database: Send + Sync {
    /// Resolves a session token to the user it belongs to
    async fn user_by_token(&self, token: &str) -> Result<UserData>;

    /// Creates a room along with its owner's membership
    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData>;
    /// Returns a room, only if it is still active
    async fn room_by_id(&self, room_id: &str) -> Result<RoomData>;
    async fn update_room(&self, updated_room: UpdatedRoom) -> Result<RoomData>;
    async fn close_room(&self, room_id: &str) -> Result<()>;

    /// Adds a member, reusing the row of a member that left before
    async fn add_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData>;
    /// Returns a membership, active or not
    async fn member(&self, room_id: &str, user_id: UserId) -> Result<RoomMemberData>;
    async fn update_member(&self, updated_member: UpdatedRoomMember) -> Result<RoomMemberData>;
    /// Marks a member as left
    async fn remove_member(&self, room_id: &str, user_id: UserId) -> Result<()>;
    async fn active_members(&self, room_id: &str) -> Result<Vec<RoomMemberData>>;
    async fn count_active_members(&self, room_id: &str) -> Result<u32>;
    /// Makes `to` the owner and demotes `from`, atomically
    async fn transfer_owner(&self, room_id: &str, from: UserId, to: UserId) -> Result<()>;

    async fn create_message(&self, new_message: NewMessage) -> Result<MessageData>;
    /// Returns messages newest first
    async fn messages(&self, room_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageData>>;

    async fn grant_control(
        &self,
        room_id: &str,
        user_id: UserId,
        can_control: bool,
    ) -> Result<RoomMemberData> {
        self.update_member(UpdatedRoomMember {
            can_control: Some(can_control),
            ..UpdatedRoomMember::new(room_id, user_id)
        })
        .await
    }

    async fn update_member_mode(
        &self,
        room_id: &str,
        user_id: UserId,
        mode: Mode,
    ) -> Result<RoomMemberData> {
        self.update_member(UpdatedRoomMember {
            mode: Some(mode),
            ..UpdatedRoomMember::new(room_id, user_id)
        })
        .await
    }
}

#[derive(Debug)]
pub struct NewRoom {
    pub id: RoomId,
    pub name: String,
    /// The owner of the new room
    pub owner_id: UserId,
    pub max_members: u32,
}

#[derive(Debug)]
pub struct UpdatedRoom {
    pub id: RoomId,
    pub name: Option<String>,
    pub max_members: Option<u32>,
}

#[derive(Debug)]
pub struct NewRoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: Role,
    pub mode: Mode,
    pub can_control: bool,
}

#[derive(Debug)]
pub struct UpdatedRoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: Option<Role>,
    pub mode: Option<Mode>,
    pub can_control: Option<bool>,
}

impl UpdatedRoomMember {
    pub fn new(room_id: &str, user_id: UserId) -> Self {
        Self {
            room_id: room_id.to_string(),
            user_id,
            role: None,
            mode: None,
            can_control: None,
        }
    }
}

#[derive(Debug)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub songs: Vec<SongCard>,
}
