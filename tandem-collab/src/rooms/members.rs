use log::{info, warn};
use tandem_core::{unix_millis, CloseReason, ConnectionHandle, UserId};

use crate::{
    protocol::*, Mode, NewMessage, NewRoomMember, OnlineMember, Role, UpdatedRoomMember, UserData,
};

use super::{RoomError, RoomManager, RoomResult, RoomSession};

impl RoomManager {
    /// Joins a user to a room and registers their connection
    pub async fn join(&self, room_id: &str, user: &UserData, mode: Mode) -> RoomResult<RoomSession> {
        let context = &self.context;

        // Held across the durable calls so the capacity check and the insert can't interleave
        let lock = context.locks.membership(room_id);
        let _guard = lock.lock().await;

        let room = context
            .database
            .room_by_id(room_id)
            .await
            .map_err(RoomError::room_lookup)?;

        let existing = match context.database.member(room_id, user.id).await {
            Ok(member) => Some(member),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        let already_active = existing.as_ref().is_some_and(|m| m.is_active());

        if !already_active {
            let active = context.database.count_active_members(room_id).await?;

            if active >= room.max_members {
                return Err(RoomError::Capacity);
            }
        }

        let (role, can_control) = match existing {
            // A previous owner that lost the room to a transfer comes back as a member
            Some(m) if m.role == Role::Owner && room.owner_id != user.id => (Role::Member, false),
            Some(m) => (m.role, m.can_control),
            None if room.owner_id == user.id => (Role::Owner, true),
            None => (Role::Member, false),
        };

        let member = context
            .database
            .add_member(NewRoomMember {
                room_id: room_id.to_string(),
                user_id: user.id,
                role,
                mode,
                can_control,
            })
            .await?;

        let online = OnlineMember {
            user_id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            role: member.role,
            mode: member.mode,
            can_control: member.can_control,
            joined_at: unix_millis(),
        };

        context
            .cache
            .set_online_member(room_id, online.clone())
            .await?;

        let registration = context.hub.register(room_id, user.id);

        self.broadcast(
            room_id,
            Some(user.id),
            ServerEvent::Join(online.clone()),
            &[user.id],
        );
        self.broadcast_member_list(room_id).await?;
        self.send_room_state(room_id, user.id, false).await?;

        info!(
            "User {} joined room {} in {} mode via connection {}",
            user.id, room_id, mode, registration.handle.id
        );

        Ok(RoomSession {
            registration,
            member: online,
        })
    }

    /// Explicitly leaves a room
    pub async fn leave(&self, room_id: &str, user_id: UserId) -> RoomResult<()> {
        let lock = self.context.locks.membership(room_id);
        let _guard = lock.lock().await;

        self.context
            .hub
            .close_connection(room_id, user_id, CloseReason::Left);

        self.leave_flow(room_id, user_id).await
    }

    /// Called once the owner of a connection sees it closed.
    ///
    /// Only losing the connection from the client side means leaving, and only if
    /// the user hasn't connected again in the meantime.
    pub async fn disconnect(&self, handle: &ConnectionHandle, reason: CloseReason) {
        let context = &self.context;
        let room_id = &handle.room_id;
        let user_id = handle.user_id;

        context.hub.unregister(room_id, user_id, handle.id);

        if !reason.ends_membership() {
            info!(
                "Connection {} of user {} in room {} closed: {}",
                handle.id, user_id, room_id, reason
            );
            return;
        }

        let lock = context.locks.membership(room_id);
        let _guard = lock.lock().await;

        if context.hub.is_connected(room_id, user_id) {
            return;
        }

        info!(
            "User {} disconnected from room {}: {}",
            user_id, room_id, reason
        );

        match self.leave_flow(room_id, user_id).await {
            Ok(_) | Err(RoomError::MemberNotFound) | Err(RoomError::RoomNotFound) => {}
            Err(err) => warn!(
                "Failed to remove user {} from room {}: {}",
                user_id, room_id, err
            ),
        }
    }

    /// Sends the member list, the playback snapshot, and the playlist to a member again
    pub(super) async fn resync(&self, room_id: &str, actor: &OnlineMember) -> RoomResult<()> {
        let members = self.context.cache.online_members(room_id).await?;

        self.send_to(
            room_id,
            actor.user_id,
            None,
            ServerEvent::MemberList(MemberListPayload { members }),
        );

        self.send_room_state(room_id, actor.user_id, true).await
    }

    pub(super) async fn switch_mode(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        mode: Mode,
    ) -> RoomResult<()> {
        let context = &self.context;

        context
            .database
            .update_member_mode(room_id, actor.user_id, mode)
            .await
            .map_err(RoomError::member_lookup)?;

        self.update_online(room_id, actor.user_id, |m| m.mode = mode)
            .await?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::ModeSync(ModeSyncPayload {
                user_id: actor.user_id,
                mode,
            }),
            &[],
        );
        self.broadcast_member_list(room_id).await?;

        // Without a state the client asks with master_request
        if mode == Mode::Listen {
            if let Some(state) = context.cache.playback(room_id).await? {
                self.send_to(
                    room_id,
                    actor.user_id,
                    None,
                    ServerEvent::MasterSync(self.snapshot(Some(&state))),
                );
            }
        }

        Ok(())
    }

    pub(super) async fn grant_control(
        &self,
        room_id: &str,
        granter: &OnlineMember,
        grantee: UserId,
        can_control: bool,
    ) -> RoomResult<()> {
        if !granter.role.is_privileged() {
            return Err(RoomError::Forbidden(
                "Only the owner or an admin can grant control",
            ));
        }

        let target = self.active_member(room_id, grantee).await?;

        if target.role == Role::Owner && grantee != granter.user_id {
            return Err(RoomError::Forbidden("The owner's control can't be changed"));
        }

        self.context
            .database
            .grant_control(room_id, grantee, can_control)
            .await?;

        self.update_online(room_id, grantee, |m| m.can_control = can_control)
            .await?;

        self.broadcast(
            room_id,
            Some(granter.user_id),
            ServerEvent::GrantControl(GrantControlPayload {
                user_id: grantee,
                can_control,
            }),
            &[],
        );
        self.broadcast_member_list(room_id).await?;

        info!(
            "User {} set control of {} in room {} to {}",
            granter.user_id, grantee, room_id, can_control
        );

        Ok(())
    }

    /// Hands the room to another active member.
    /// An admin may do this on behalf of an owner that left.
    pub(super) async fn transfer_owner(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        to: UserId,
    ) -> RoomResult<()> {
        let context = &self.context;

        if to == actor.user_id {
            return Err(RoomError::BadRequest(
                "Ownership can't be transferred to yourself".to_string(),
            ));
        }

        let room = context
            .database
            .room_by_id(room_id)
            .await
            .map_err(RoomError::room_lookup)?;

        let from = room.owner_id;
        let is_owner = actor.role == Role::Owner && from == actor.user_id;

        if !is_owner {
            let owner_present = match self.active_member(room_id, from).await {
                Ok(_) => true,
                Err(RoomError::MemberNotFound) => false,
                Err(err) => return Err(err),
            };

            if actor.role != Role::Admin || owner_present {
                return Err(RoomError::Forbidden("Only the owner can transfer ownership"));
            }
        }

        let target = self.active_member(room_id, to).await?;

        context
            .database
            .transfer_owner(room_id, from, to)
            .await
            .map_err(RoomError::member_lookup)?;

        self.update_online(room_id, from, |m| {
            m.role = Role::Member;
            m.can_control = false;
        })
        .await?;

        self.update_online(room_id, to, |m| {
            m.role = Role::Owner;
            m.can_control = true;
        })
        .await?;

        for (user_id, role) in [(from, Role::Member), (to, Role::Owner)] {
            self.broadcast(
                room_id,
                Some(actor.user_id),
                ServerEvent::RoleUpdate(RoleUpdatePayload { user_id, role }),
                &[],
            );
        }

        self.broadcast_member_list(room_id).await?;

        let new_owner_name = context
            .cache
            .online_member(room_id, to)
            .await?
            .map(|m| m.username)
            .unwrap_or_else(|| target.user_id.to_string());

        let notice = context
            .database
            .create_message(NewMessage {
                room_id: room_id.to_string(),
                user_id: actor.user_id,
                content: format!("{} is now the owner of this room", new_owner_name),
                message_type: crate::MessageType::System,
                songs: vec![],
            })
            .await?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::Chat(notice.into()),
            &[],
        );

        info!(
            "Ownership of room {} moved from {} to {} by {}",
            room_id, from, to, actor.user_id
        );

        Ok(())
    }

    pub(super) async fn update_role(
        &self,
        room_id: &str,
        actor: &OnlineMember,
        target: UserId,
        role: Role,
    ) -> RoomResult<()> {
        if actor.role != Role::Owner {
            return Err(RoomError::Forbidden("Only the owner can change roles"));
        }

        if role == Role::Owner {
            return Err(RoomError::BadRequest(
                "Use transfer_owner to change the owner".to_string(),
            ));
        }

        let member = self.active_member(room_id, target).await?;

        if member.role == Role::Owner {
            return Err(RoomError::Forbidden("The owner's role can't be changed"));
        }

        self.context
            .database
            .update_member(UpdatedRoomMember {
                role: Some(role),
                ..UpdatedRoomMember::new(room_id, target)
            })
            .await?;

        self.update_online(room_id, target, |m| m.role = role).await?;

        self.broadcast(
            room_id,
            Some(actor.user_id),
            ServerEvent::RoleUpdate(RoleUpdatePayload {
                user_id: target,
                role,
            }),
            &[],
        );
        self.broadcast_member_list(room_id).await
    }

    /// Removes a member. The caller holds the membership lock.
    async fn leave_flow(&self, room_id: &str, user_id: UserId) -> RoomResult<()> {
        let context = &self.context;

        let username = context
            .cache
            .online_member(room_id, user_id)
            .await?
            .map(|m| m.username)
            .unwrap_or_default();

        context
            .database
            .remove_member(room_id, user_id)
            .await
            .map_err(RoomError::member_lookup)?;

        context.cache.remove_online_member(room_id, user_id).await?;

        self.broadcast(
            room_id,
            Some(user_id),
            ServerEvent::Leave(LeavePayload { user_id, username }),
            &[user_id],
        );
        self.broadcast_member_list(room_id).await?;

        info!("User {} left room {}", user_id, room_id);

        if context.database.count_active_members(room_id).await? == 0 {
            self.close_room(room_id, None).await?;
        }

        Ok(())
    }

    /// Privately sends what a newly synced member needs: the playback and the playlist.
    /// `always_sync` sends the empty snapshot when nothing is playing yet.
    async fn send_room_state(
        &self,
        room_id: &str,
        user_id: UserId,
        always_sync: bool,
    ) -> RoomResult<()> {
        let cache = &self.context.cache;
        let state = cache.playback(room_id).await?;

        if state.is_some() || always_sync {
            self.send_to(
                room_id,
                user_id,
                None,
                ServerEvent::MasterSync(self.snapshot(state.as_ref())),
            );
        }

        if let Some(songs) = cache.playlist(room_id).await? {
            self.send_to(
                room_id,
                user_id,
                None,
                ServerEvent::Playlist(PlaylistPayload { songs }),
            );
        }

        Ok(())
    }

    /// Updates a cached online member, if they're online
    async fn update_online<F>(&self, room_id: &str, user_id: UserId, update: F) -> RoomResult<()>
    where
        F: FnOnce(&mut OnlineMember),
    {
        let cache = &self.context.cache;

        if let Some(mut member) = cache.online_member(room_id, user_id).await? {
            update(&mut member);
            cache.set_online_member(room_id, member).await?;
        }

        Ok(())
    }
}
