use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tandem_core::{RoomId, UserId};

use crate::{
    Database, DatabaseError, MessageData, NewMessage, NewRoom, NewRoomMember, Result, RoomData,
    RoomMemberData, RoomStatus, UpdatedRoom, UpdatedRoomMember, UserData,
};

/// A database that only lives in memory.
/// Used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserData>,
    sessions: HashMap<String, UserId>,
    rooms: HashMap<RoomId, RoomData>,
    members: HashMap<(RoomId, UserId), RoomMemberData>,
    messages: Vec<MessageData>,
}

impl MemoryState {
    fn active_room(&mut self, room_id: &str) -> Result<&mut RoomData> {
        self.rooms
            .get_mut(room_id)
            .filter(|r| r.status == RoomStatus::Active)
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })
    }

    fn active_member(&mut self, room_id: &str, user_id: UserId) -> Result<&mut RoomMemberData> {
        self.members
            .get_mut(&(room_id.to_string(), user_id))
            .filter(|m| m.is_active())
            .ok_or(DatabaseError::NotFound {
                resource: "room member",
                identifier: "room_id:user_id",
            })
    }

    fn username(&self, user_id: UserId) -> String {
        self.users
            .get(&user_id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }
}

impl MemoryDatabase {
    /// Adds a user and a session token that resolves to it.
    pub fn insert_user(&self, user: UserData, token: &str) {
        let mut state = self.state.lock();

        state.sessions.insert(token.to_string(), user.id);
        state.users.insert(user.id, user);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_token(&self, token: &str) -> Result<UserData> {
        let state = self.state.lock();

        state
            .sessions
            .get(token)
            .and_then(|id| state.users.get(id))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "token",
            })
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        let mut state = self.state.lock();

        if state.rooms.contains_key(&new_room.id) {
            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "id",
                value: new_room.id,
            });
        }

        let now = Utc::now();
        let room = RoomData {
            id: new_room.id.clone(),
            name: new_room.name,
            owner_id: new_room.owner_id,
            max_members: new_room.max_members,
            status: RoomStatus::Active,
            created_at: now,
            closed_at: None,
        };

        state.members.insert(
            (new_room.id.clone(), new_room.owner_id),
            RoomMemberData {
                room_id: new_room.id.clone(),
                user_id: new_room.owner_id,
                role: crate::Role::Owner,
                mode: crate::Mode::Chat,
                can_control: true,
                joined_at: now,
                left_at: None,
            },
        );
        state.rooms.insert(new_room.id, room.clone());

        Ok(room)
    }

    async fn room_by_id(&self, room_id: &str) -> Result<RoomData> {
        self.state.lock().active_room(room_id).map(|r| r.clone())
    }

    async fn update_room(&self, updated_room: UpdatedRoom) -> Result<RoomData> {
        let mut state = self.state.lock();
        let room = state.active_room(&updated_room.id)?;

        if let Some(name) = updated_room.name {
            room.name = name;
        }

        if let Some(max_members) = updated_room.max_members {
            room.max_members = max_members;
        }

        Ok(room.clone())
    }

    async fn close_room(&self, room_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let room = state.active_room(room_id)?;

        room.status = RoomStatus::Closed;
        room.closed_at = Some(Utc::now());

        Ok(())
    }

    async fn add_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData> {
        let mut state = self.state.lock();
        let key = (new_member.room_id.clone(), new_member.user_id);

        let member = RoomMemberData {
            room_id: new_member.room_id,
            user_id: new_member.user_id,
            role: new_member.role,
            mode: new_member.mode,
            can_control: new_member.can_control,
            joined_at: Utc::now(),
            left_at: None,
        };

        state.members.insert(key, member.clone());
        Ok(member)
    }

    async fn member(&self, room_id: &str, user_id: UserId) -> Result<RoomMemberData> {
        self.state
            .lock()
            .members
            .get(&(room_id.to_string(), user_id))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room member",
                identifier: "room_id:user_id",
            })
    }

    async fn update_member(&self, updated_member: UpdatedRoomMember) -> Result<RoomMemberData> {
        let mut state = self.state.lock();
        let member = state.active_member(&updated_member.room_id, updated_member.user_id)?;

        if let Some(role) = updated_member.role {
            member.role = role;
        }

        if let Some(mode) = updated_member.mode {
            member.mode = mode;
        }

        if let Some(can_control) = updated_member.can_control {
            member.can_control = can_control;
        }

        Ok(member.clone())
    }

    async fn remove_member(&self, room_id: &str, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock();
        let member = state.active_member(room_id, user_id)?;

        member.left_at = Some(Utc::now());
        Ok(())
    }

    async fn active_members(&self, room_id: &str) -> Result<Vec<RoomMemberData>> {
        let state = self.state.lock();

        let mut members: Vec<_> = state
            .members
            .values()
            .filter(|m| m.room_id == room_id && m.is_active())
            .cloned()
            .collect();

        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn count_active_members(&self, room_id: &str) -> Result<u32> {
        let state = self.state.lock();

        let count = state
            .members
            .values()
            .filter(|m| m.room_id == room_id && m.is_active())
            .count();

        Ok(count as u32)
    }

    async fn transfer_owner(&self, room_id: &str, from: UserId, to: UserId) -> Result<()> {
        let mut state = self.state.lock();

        // Validate everything before touching anything, so a failure changes nothing
        state.active_room(room_id)?;
        state.active_member(room_id, to)?;

        if let Some(previous) = state.members.get_mut(&(room_id.to_string(), from)) {
            previous.role = crate::Role::Member;
            previous.can_control = false;
        }

        let next = state.active_member(room_id, to)?;
        next.role = crate::Role::Owner;
        next.can_control = true;

        state.active_room(room_id)?.owner_id = to;

        Ok(())
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<MessageData> {
        let mut state = self.state.lock();

        let message = MessageData {
            id: state.messages.len() as i64 + 1,
            username: state.username(new_message.user_id),
            room_id: new_message.room_id,
            user_id: new_message.user_id,
            content: new_message.content,
            message_type: new_message.message_type,
            songs: new_message.songs,
            created_at: Utc::now(),
        };

        state.messages.push(message.clone());
        Ok(message)
    }

    async fn messages(&self, room_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageData>> {
        let state = self.state.lock();

        let messages = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_id == room_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Mode, Role};

    use super::*;

    async fn make_room(db: &MemoryDatabase) -> RoomData {
        let room = db
            .create_room(NewRoom {
                id: "room".to_string(),
                name: "Test".to_string(),
                owner_id: 1,
                max_members: 4,
            })
            .await
            .unwrap();

        db.add_member(NewRoomMember {
            room_id: room.id.clone(),
            user_id: 2,
            role: Role::Member,
            mode: Mode::Listen,
            can_control: false,
        })
        .await
        .unwrap();

        room
    }

    #[tokio::test]
    async fn test_transfer_owner_swaps_roles() {
        let db = MemoryDatabase::default();
        let room = make_room(&db).await;

        db.transfer_owner(&room.id, 1, 2).await.unwrap();

        let previous = db.member(&room.id, 1).await.unwrap();
        let next = db.member(&room.id, 2).await.unwrap();

        assert_eq!(previous.role, Role::Member);
        assert!(!previous.can_control);
        assert_eq!(next.role, Role::Owner);
        assert!(next.can_control);
        assert_eq!(db.room_by_id(&room.id).await.unwrap().owner_id, 2);
    }

    #[tokio::test]
    async fn test_failed_transfer_changes_nothing() {
        let db = MemoryDatabase::default();
        let room = make_room(&db).await;

        let result = db.transfer_owner(&room.id, 1, 99).await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(db.member(&room.id, 1).await.unwrap().role, Role::Owner);
    }

    #[tokio::test]
    async fn test_rejoin_reuses_the_row() {
        let db = MemoryDatabase::default();
        let room = make_room(&db).await;

        db.remove_member(&room.id, 2).await.unwrap();
        assert_eq!(db.count_active_members(&room.id).await.unwrap(), 1);
        assert!(!db.member(&room.id, 2).await.unwrap().is_active());

        db.add_member(NewRoomMember {
            room_id: room.id.clone(),
            user_id: 2,
            role: Role::Member,
            mode: Mode::Chat,
            can_control: false,
        })
        .await
        .unwrap();

        assert_eq!(db.count_active_members(&room.id).await.unwrap(), 2);
        assert_eq!(db.active_members(&room.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_rooms_are_not_found() {
        let db = MemoryDatabase::default();
        let room = make_room(&db).await;

        db.close_room(&room.id).await.unwrap();

        assert!(db.room_by_id(&room.id).await.unwrap_err().is_not_found());
        assert!(db.close_room(&room.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_messages_are_paged_newest_first() {
        let db = MemoryDatabase::default();
        let room = make_room(&db).await;

        for content in ["one", "two", "three"] {
            db.create_message(NewMessage {
                room_id: room.id.clone(),
                user_id: 1,
                content: content.to_string(),
                message_type: Default::default(),
                songs: vec![],
            })
            .await
            .unwrap();
        }

        let page: Vec<_> = db
            .messages(&room.id, 2, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();

        assert_eq!(page, vec!["two", "one"]);
    }
}
