use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, query, query_as, types::Json, Error as SqlxError, PgPool};
use tandem_core::UserId;

use crate::{
    Database, DatabaseError, IntoDatabaseError, MessageData, NewMessage, NewRoom, NewRoomMember,
    Result, RoomData, RoomMemberData, SongCard, UpdatedRoom, UpdatedRoomMember, UserData,
};

/// A postgres database implementation for tandem
pub struct PgDatabase {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    avatar: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: String,
    name: String,
    owner_id: i64,
    max_members: i32,
    status: String,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    room_id: String,
    user_id: i64,
    role: String,
    mode: String,
    can_control: bool,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: String,
    user_id: i64,
    username: String,
    content: String,
    message_type: String,
    songs: Json<Vec<SongCard>>,
    created_at: DateTime<Utc>,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_token(&self, token: &str) -> Result<UserData> {
        query_as::<_, UserRow>(
            "SELECT users.id, users.username, users.avatar
            FROM sessions
                INNER JOIN users ON sessions.user_id = users.id
            WHERE sessions.token = $1 AND sessions.expires_at > now()",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("session", "token"))
    }

    async fn create_room(&self, new_room: NewRoom) -> Result<RoomData> {
        let mut transaction = self.pool.begin().await.map_err(|e| e.any())?;

        let room = query_as::<_, RoomRow>(
            "INSERT INTO rooms (id, name, owner_id, max_members, status, created_at)
            VALUES ($1, $2, $3, $4, 'active', now())
            RETURNING *",
        )
        .bind(&new_room.id)
        .bind(&new_room.name)
        .bind(new_room.owner_id)
        .bind(new_room.max_members as i32)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|e| e.conflict_or_any("room", "id", &new_room.id))?;

        // The owner is a member from the start
        query(
            "INSERT INTO room_members (room_id, user_id, role, mode, can_control, joined_at)
            VALUES ($1, $2, 'owner', 'chat', true, now())",
        )
        .bind(&new_room.id)
        .bind(new_room.owner_id)
        .execute(&mut *transaction)
        .await
        .map_err(|e| e.any())?;

        transaction.commit().await.map_err(|e| e.any())?;

        room.try_into()
    }

    async fn room_by_id(&self, room_id: &str) -> Result<RoomData> {
        query_as::<_, RoomRow>("SELECT * FROM rooms WHERE id = $1 AND status = 'active'")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))?
            .try_into()
    }

    async fn update_room(&self, updated_room: UpdatedRoom) -> Result<RoomData> {
        query_as::<_, RoomRow>(
            "UPDATE rooms SET
                name = COALESCE($2, name),
                max_members = COALESCE($3, max_members)
            WHERE id = $1 AND status = 'active'
            RETURNING *",
        )
        .bind(&updated_room.id)
        .bind(updated_room.name)
        .bind(updated_room.max_members.map(|m| m as i32))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("room", "id"))?
        .try_into()
    }

    async fn close_room(&self, room_id: &str) -> Result<()> {
        let result = query(
            "UPDATE rooms SET status = 'closed', closed_at = now()
            WHERE id = $1 AND status = 'active'",
        )
        .bind(room_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        expect_affected(result.rows_affected(), "room", "id")
    }

    async fn add_member(&self, new_member: NewRoomMember) -> Result<RoomMemberData> {
        query_as::<_, MemberRow>(
            "INSERT INTO room_members (room_id, user_id, role, mode, can_control, joined_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (room_id, user_id) DO UPDATE SET
                role = EXCLUDED.role,
                mode = EXCLUDED.mode,
                can_control = EXCLUDED.can_control,
                joined_at = EXCLUDED.joined_at,
                left_at = NULL
            RETURNING *",
        )
        .bind(&new_member.room_id)
        .bind(new_member.user_id)
        .bind(new_member.role.as_str())
        .bind(new_member.mode.as_str())
        .bind(new_member.can_control)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?
        .try_into()
    }

    async fn member(&self, room_id: &str, user_id: UserId) -> Result<RoomMemberData> {
        query_as::<_, MemberRow>("SELECT * FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room member", "room_id:user_id"))?
            .try_into()
    }

    async fn update_member(&self, updated_member: UpdatedRoomMember) -> Result<RoomMemberData> {
        query_as::<_, MemberRow>(
            "UPDATE room_members SET
                role = COALESCE($3, role),
                mode = COALESCE($4, mode),
                can_control = COALESCE($5, can_control)
            WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL
            RETURNING *",
        )
        .bind(&updated_member.room_id)
        .bind(updated_member.user_id)
        .bind(updated_member.role.map(|r| r.as_str()))
        .bind(updated_member.mode.map(|m| m.as_str()))
        .bind(updated_member.can_control)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("room member", "room_id:user_id"))?
        .try_into()
    }

    async fn remove_member(&self, room_id: &str, user_id: UserId) -> Result<()> {
        let result = query(
            "UPDATE room_members SET left_at = now()
            WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        expect_affected(result.rows_affected(), "room member", "room_id:user_id")
    }

    async fn active_members(&self, room_id: &str) -> Result<Vec<RoomMemberData>> {
        query_as::<_, MemberRow>(
            "SELECT * FROM room_members
            WHERE room_id = $1 AND left_at IS NULL
            ORDER BY joined_at",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn count_active_members(&self, room_id: &str) -> Result<u32> {
        let (count,): (i64,) = query_as(
            "SELECT COUNT(*) FROM room_members WHERE room_id = $1 AND left_at IS NULL",
        )
        .bind(room_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(count as u32)
    }

    async fn transfer_owner(&self, room_id: &str, from: UserId, to: UserId) -> Result<()> {
        let mut transaction = self.pool.begin().await.map_err(|e| e.any())?;

        // Demote first, only one owner row may exist at any time
        query(
            "UPDATE room_members SET role = 'member', can_control = false
            WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(from)
        .execute(&mut *transaction)
        .await
        .map_err(|e| e.any())?;

        let promoted = query(
            "UPDATE room_members SET role = 'owner', can_control = true
            WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(room_id)
        .bind(to)
        .execute(&mut *transaction)
        .await
        .map_err(|e| e.any())?;

        // Dropping the transaction rolls it back
        expect_affected(promoted.rows_affected(), "room member", "room_id:user_id")?;

        let moved = query("UPDATE rooms SET owner_id = $2 WHERE id = $1 AND status = 'active'")
            .bind(room_id)
            .bind(to)
            .execute(&mut *transaction)
            .await
            .map_err(|e| e.any())?;

        expect_affected(moved.rows_affected(), "room", "id")?;

        transaction.commit().await.map_err(|e| e.any())
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<MessageData> {
        query_as::<_, MessageRow>(
            "WITH inserted AS (
                INSERT INTO room_messages (room_id, user_id, content, message_type, songs, created_at)
                VALUES ($1, $2, $3, $4, $5, now())
                RETURNING *
            )
            SELECT inserted.*, COALESCE(users.username, '') AS username
            FROM inserted
                LEFT JOIN users ON inserted.user_id = users.id",
        )
        .bind(&new_message.room_id)
        .bind(new_message.user_id)
        .bind(&new_message.content)
        .bind(new_message.message_type.as_str())
        .bind(Json(&new_message.songs))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?
        .try_into()
    }

    async fn messages(&self, room_id: &str, limit: u32, offset: u32) -> Result<Vec<MessageData>> {
        query_as::<_, MessageRow>(
            "SELECT room_messages.*, COALESCE(users.username, '') AS username
            FROM room_messages
                LEFT JOIN users ON room_messages.user_id = users.id
            WHERE room_messages.room_id = $1
            ORDER BY room_messages.created_at DESC, room_messages.id DESC
            LIMIT $2 OFFSET $3",
        )
        .bind(room_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }
}

fn expect_affected(rows: u64, resource: &'static str, identifier: &'static str) -> Result<()> {
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            resource,
            identifier,
        });
    }

    Ok(())
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            avatar: row.avatar,
        }
    }
}

impl TryFrom<RoomRow> for RoomData {
    type Error = DatabaseError;

    fn try_from(row: RoomRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            max_members: row.max_members.max(0) as u32,
            status: row.status.parse()?,
            created_at: row.created_at,
            closed_at: row.closed_at,
        })
    }
}

impl TryFrom<MemberRow> for RoomMemberData {
    type Error = DatabaseError;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(Self {
            room_id: row.room_id,
            user_id: row.user_id,
            role: row.role.parse()?,
            mode: row.mode.parse()?,
            can_control: row.can_control,
            joined_at: row.joined_at,
            left_at: row.left_at,
        })
    }
}

impl TryFrom<MessageRow> for MessageData {
    type Error = DatabaseError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            room_id: row.room_id,
            user_id: row.user_id,
            username: row.username,
            content: row.content,
            message_type: row.message_type.parse()?,
            songs: row.songs.0,
            created_at: row.created_at,
        })
    }
}

trait ConflictOrAny {
    fn conflict_or_any(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
}

impl ConflictOrAny for SqlxError {
    fn conflict_or_any(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> DatabaseError {
        match &self {
            SqlxError::Database(e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            },
            _ => self.any(),
        }
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
