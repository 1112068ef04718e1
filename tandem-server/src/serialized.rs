//! All schemas that are exposed from endpoints are defined here
//! along with the conversions into them

use serde::Serialize;
use tandem_collab::{ChatMessage, OnlineMember, RoomData, RoomDetails, SongCard, UserData};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: i64,
    username: String,
    avatar: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: String,
    name: String,
    owner_id: i64,
    max_members: u32,
    status: String,
    /// Unix milliseconds
    created_at: i64,
    online: Vec<RoomMember>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    user_id: i64,
    username: String,
    avatar: Option<String>,
    role: String,
    mode: String,
    can_control: bool,
    joined_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    id: i64,
    name: String,
    artist: String,
    cover: String,
    duration: i64,
    hls_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: i64,
    user_id: i64,
    username: String,
    content: String,
    message_type: String,
    songs: Vec<Song>,
    created_at: i64,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

impl ToSerialized<Room> for RoomData {
    fn to_serialized(&self) -> Room {
        Room {
            id: self.id.clone(),
            name: self.name.clone(),
            owner_id: self.owner_id,
            max_members: self.max_members,
            status: self.status.to_string(),
            created_at: self.created_at.timestamp_millis(),
            online: vec![],
        }
    }
}

impl ToSerialized<Room> for RoomDetails {
    fn to_serialized(&self) -> Room {
        Room {
            online: self.online.to_serialized(),
            ..self.room.to_serialized()
        }
    }
}

impl ToSerialized<RoomMember> for OnlineMember {
    fn to_serialized(&self) -> RoomMember {
        RoomMember {
            user_id: self.user_id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
            role: self.role.to_string(),
            mode: self.mode.to_string(),
            can_control: self.can_control,
            joined_at: self.joined_at,
        }
    }
}

impl ToSerialized<Song> for SongCard {
    fn to_serialized(&self) -> Song {
        Song {
            id: self.id,
            name: self.name.clone(),
            artist: self.artist.clone(),
            cover: self.cover.clone(),
            duration: self.duration,
            hls_url: self.hls_url.clone(),
        }
    }
}

impl ToSerialized<Message> for ChatMessage {
    fn to_serialized(&self) -> Message {
        Message {
            id: self.id,
            user_id: self.user_id,
            username: self.username.clone(),
            content: self.content.clone(),
            message_type: self.message_type.to_string(),
            songs: self.songs.to_serialized(),
            created_at: self.created_at,
        }
    }
}
