//! The JSON frames exchanged over a room connection.
//!
//! Every frame is `{ "type": ..., "data": ... }`. Outgoing frames also carry
//! `roomId`, `userId` (the actor, if any), and `timestamp`.

use serde::{Deserialize, Serialize};
use tandem_core::{unix_millis, RoomId, UserId};

use crate::{MessageData, MessageType, Mode, OnlineMember, Role, RoomPlaybackState, SongCard};

/// A frame sent by a client. Identity comes from the connection, never the frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for a full resync of an already joined room
    Join,
    Leave,
    Chat(ChatPayload),
    SongAdd(ChatPayload),
    SongSearch(ChatPayload),
    SongPlay(SongPlayPayload),
    Playlist(PlaylistPayload),
    PlaylistReorder(ReorderPayload),
    ModeSync(ModePayload),
    TransferOwner(TransferOwnerPayload),
    GrantControl(GrantControlPayload),
    RoleUpdate(RoleUpdatePayload),
    MasterReport(MasterReport),
    MasterRequest,
    MasterMode(MasterModePayload),
    RoomDisband,
    Ping,
    /// Application level pong, only used to keep the connection alive
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub songs: Vec<SongCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongPlayPayload {
    pub song: SongCard,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPayload {
    pub songs: Vec<SongCard>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderPayload {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModePayload {
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOwnerPayload {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantControlPayload {
    pub user_id: UserId,
    pub can_control: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdatePayload {
    pub user_id: UserId,
    pub role: Role,
}

/// A controller's report of its own playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterReport {
    /// In seconds
    pub position: f64,
    pub is_playing: bool,
    #[serde(default)]
    pub song_id: Option<i64>,
    #[serde(default)]
    pub song: Option<SongCard>,
    #[serde(default)]
    pub current_index: Option<u32>,
    /// Present only when the report changes the song
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl MasterReport {
    /// The song this report is about, if it names one
    pub fn reported_song_id(&self) -> Option<i64> {
        self.song.as_ref().map(|s| s.id).or(self.song_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterModePayload {
    pub enabled: bool,
}

/// A frame sent by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub room_id: RoomId,
    /// Who caused this message, if anyone
    pub user_id: Option<UserId>,
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl ServerMessage {
    pub fn new(room_id: &str, user_id: Option<UserId>, event: ServerEvent) -> Self {
        Self {
            room_id: room_id.to_string(),
            user_id,
            timestamp: unix_millis(),
            event,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Join(OnlineMember),
    Leave(LeavePayload),
    MemberList(MemberListPayload),
    Chat(ChatMessage),
    SongAdd(ChatMessage),
    SongSearch(ChatMessage),
    SongPlay(SongPlayPayload),
    Playlist(PlaylistPayload),
    PlaylistReorder(ReorderPayload),
    ModeSync(ModeSyncPayload),
    GrantControl(GrantControlPayload),
    RoleUpdate(RoleUpdatePayload),
    /// A listener asked the master to report
    MasterRequest(MasterRequestEvent),
    MasterSync(MasterSync),
    MasterMode(MasterModePayload),
    SongChange(SongChange),
    RoomDisband,
    Pong,
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::MemberList(_) => "member_list",
            Self::Chat(_) => "chat",
            Self::SongAdd(_) => "song_add",
            Self::SongSearch(_) => "song_search",
            Self::SongPlay(_) => "song_play",
            Self::Playlist(_) => "playlist",
            Self::PlaylistReorder(_) => "playlist_reorder",
            Self::ModeSync(_) => "mode_sync",
            Self::GrantControl(_) => "grant_control",
            Self::RoleUpdate(_) => "role_update",
            Self::MasterRequest(_) => "master_request",
            Self::MasterSync(_) => "master_sync",
            Self::MasterMode(_) => "master_mode",
            Self::SongChange(_) => "song_change",
            Self::RoomDisband => "room_disband",
            Self::Pong => "pong",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberListPayload {
    pub members: Vec<OnlineMember>,
}

/// A persisted chat message as clients render it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    pub message_type: MessageType,
    pub songs: Vec<SongCard>,
    /// Unix milliseconds
    pub created_at: i64,
}

impl From<MessageData> for ChatMessage {
    fn from(message: MessageData) -> Self {
        Self {
            id: message.id,
            user_id: message.user_id,
            username: message.username,
            content: message.content,
            message_type: message.message_type,
            songs: message.songs,
            created_at: message.created_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSyncPayload {
    pub user_id: UserId,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterRequestEvent {
    pub requested_by: UserId,
}

/// A snapshot of the room's authoritative playback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterSync {
    pub song_id: Option<i64>,
    pub name: String,
    pub artist: String,
    pub cover: String,
    /// In milliseconds
    pub duration: i64,
    /// In seconds
    pub position: f64,
    pub is_playing: bool,
    pub hls_url: String,
    /// Unix milliseconds at the time the snapshot was taken
    pub server_time: i64,
    pub master_id: Option<UserId>,
    pub master_name: Option<String>,
    pub state_version: u64,
    pub current_index: Option<u32>,
    pub updated_at: i64,
    /// How often the master reports, so listeners can judge staleness
    pub report_interval_ms: u64,
}

impl MasterSync {
    /// Builds a snapshot, or the empty default if there's no state yet.
    pub fn from_state(state: Option<&RoomPlaybackState>, report_interval_ms: u64) -> Self {
        let base = Self {
            server_time: unix_millis(),
            report_interval_ms,
            ..Default::default()
        };

        let Some(state) = state else {
            return base;
        };

        let song = state.current_song.clone();

        Self {
            song_id: song.as_ref().map(|s| s.id),
            name: song.as_ref().map(|s| s.name.clone()).unwrap_or_default(),
            artist: song.as_ref().map(|s| s.artist.clone()).unwrap_or_default(),
            cover: song.as_ref().map(|s| s.cover.clone()).unwrap_or_default(),
            duration: song.as_ref().map(|s| s.duration).unwrap_or_default(),
            hls_url: song.map(|s| s.hls_url).unwrap_or_default(),
            position: state.position,
            is_playing: state.is_playing,
            master_id: Some(state.updated_by),
            master_name: Some(state.updated_by_name.clone()),
            state_version: state.state_version,
            current_index: state.current_index,
            updated_at: state.updated_at,
            ..base
        }
    }
}

/// An accepted song change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongChange {
    #[serde(flatten)]
    pub sync: MasterSync,
    pub changed_by: UserId,
    pub changed_by_name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    /// The current playback, sent along with version conflicts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state: Option<MasterSync>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unit_frames_parse_with_or_without_data() {
        let bare: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        let null: ClientMessage =
            serde_json::from_str(r#"{"type":"master_request","data":null}"#).unwrap();

        assert_eq!(bare, ClientMessage::Ping);
        assert_eq!(null, ClientMessage::MasterRequest);
    }

    #[test]
    fn test_envelope_fields_are_ignored() {
        let frame = json!({
            "type": "grant_control",
            "roomId": "ignored",
            "userId": 999,
            "timestamp": 1,
            "data": { "userId": 2, "canControl": true }
        });

        let message: ClientMessage = serde_json::from_value(frame).unwrap();

        assert_eq!(
            message,
            ClientMessage::GrantControl(GrantControlPayload {
                user_id: 2,
                can_control: true
            })
        );
    }

    #[test]
    fn test_master_report_fields_are_camel_case() {
        let frame = json!({
            "type": "master_report",
            "data": { "position": 12.5, "isPlaying": true, "songId": 7, "expectedVersion": 3 }
        });

        let ClientMessage::MasterReport(report) = serde_json::from_value(frame).unwrap() else {
            panic!("expected a master report");
        };

        assert_eq!(report.expected_version, Some(3));
        assert_eq!(report.reported_song_id(), Some(7));
        assert_eq!(report.current_index, None);
    }

    #[test]
    fn test_unknown_types_are_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"teleport","data":{}}"#);

        assert!(result.is_err());
    }

    #[test]
    fn test_server_messages_have_a_flat_envelope() {
        let message = ServerMessage::new("abc", Some(1), ServerEvent::Pong);
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "pong");
        assert_eq!(value["roomId"], "abc");
        assert_eq!(value["userId"], 1);
        assert!(value["timestamp"].is_i64());
        assert_eq!(message.event_type(), "pong");
    }

    #[test]
    fn test_song_change_flattens_the_snapshot() {
        let state = RoomPlaybackState {
            current_song: Some(SongCard {
                id: 5,
                name: "Song".to_string(),
                artist: "Artist".to_string(),
                cover: String::new(),
                duration: 1000,
                hls_url: "/hls/5.m3u8".to_string(),
            }),
            state_version: 2,
            updated_by: 1,
            updated_by_name: "alice".to_string(),
            ..Default::default()
        };

        let event = ServerEvent::SongChange(SongChange {
            sync: MasterSync::from_state(Some(&state), 3000),
            changed_by: 1,
            changed_by_name: "alice".to_string(),
            timestamp: 10,
        });

        let value = serde_json::to_value(ServerMessage::new("abc", Some(1), event)).unwrap();
        let data = &value["data"];

        assert_eq!(value["type"], "song_change");
        assert_eq!(data["songId"], 5);
        assert_eq!(data["hlsUrl"], "/hls/5.m3u8");
        assert_eq!(data["stateVersion"], 2);
        assert_eq!(data["changedByName"], "alice");
        assert_eq!(data["reportIntervalMs"], 3000);
    }

    #[test]
    fn test_empty_snapshot_has_no_master() {
        let sync = MasterSync::from_state(None, 3000);

        assert_eq!(sync.state_version, 0);
        assert_eq!(sync.master_id, None);
        assert!(sync.server_time > 0);
    }
}
