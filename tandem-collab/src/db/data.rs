use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_core::{RoomId, UserId};

use super::DatabaseError;

/// An account, as known to the auth tables
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Closed,
}

/// A listening room
#[derive(Debug, Clone)]
pub struct RoomData {
    pub id: RoomId,
    pub name: String,
    pub owner_id: UserId,
    pub max_members: u32,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    /// Whether this role may change other members' permissions
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// What a member is doing in a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Only chatting, playback is independent
    #[default]
    Chat,
    /// Following the master's playback
    Listen,
}

/// A member of a room. Left members keep their row with `left_at` set.
#[derive(Debug, Clone)]
pub struct RoomMemberData {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: Role,
    pub mode: Mode,
    pub can_control: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl RoomMemberData {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    System,
    SongAdd,
    SongSearch,
}

/// A song as shared between clients. The server never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongCard {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub cover: String,
    /// In milliseconds
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub hls_url: String,
}

/// A persisted chat message
#[derive(Debug, Clone)]
pub struct MessageData {
    pub id: i64,
    pub room_id: RoomId,
    pub user_id: UserId,
    /// The author's display name at read time
    pub username: String,
    pub content: String,
    pub message_type: MessageType,
    pub songs: Vec<SongCard>,
    pub created_at: DateTime<Utc>,
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DatabaseError::Internal(
                        format!("invalid {} value \"{}\"", stringify!($name), other).into(),
                    )),
                }
            }
        }
    };
}

text_enum!(RoomStatus { Active => "active", Closed => "closed" });
text_enum!(Role { Owner => "owner", Admin => "admin", Member => "member" });
text_enum!(Mode { Chat => "chat", Listen => "listen" });
text_enum!(MessageType {
    Text => "text",
    System => "system",
    SongAdd => "song_add",
    SongSearch => "song_search",
});
