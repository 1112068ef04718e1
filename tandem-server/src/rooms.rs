use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json,
};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{HistoryQuery, NewRoomSchema, ValidatedJson},
    serialized::{Message, Room, ToSerialized},
    Router,
};

#[utoipa::path(
    post,
    path = "/v1/rooms",
    tag = "rooms",
    request_body = NewRoomSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room)
    )
)]
async fn create_room(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<Json<Room>> {
    let room = context
        .collab
        .rooms
        .create_room(&session.user, &body.name, body.max_members)
        .await?;

    Ok(Json(room.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}",
    tag = "rooms",
    params(
        ("id" = String, Path, description = "The room id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Room),
        (status = 404, description = "The room doesn't exist or is closed")
    )
)]
async fn room(
    _session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<Json<Room>> {
    let details = context.collab.rooms.room(&room_id).await?;

    Ok(Json(details.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/rooms/{id}/messages",
    tag = "rooms",
    params(
        ("id" = String, Path, description = "The room id"),
        HistoryQuery
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Message>),
        (status = 403, description = "Only members can read the history")
    )
)]
async fn room_messages(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ServerResult<Json<Vec<Message>>> {
    let limit = query
        .limit
        .unwrap_or(context.collab.context().config.history_page_limit);

    let messages = context
        .collab
        .rooms
        .messages(&room_id, session.user.id, limit, query.offset.unwrap_or(0))
        .await?;

    Ok(Json(messages.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/v1/rooms/{id}",
    tag = "rooms",
    params(
        ("id" = String, Path, description = "The room id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The room was disbanded"),
        (status = 403, description = "Only the owner can disband the room")
    )
)]
async fn disband_room(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
) -> ServerResult<StatusCode> {
    context
        .collab
        .rooms
        .disband(&room_id, session.user.id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_room))
        .route("/:id", get(room).delete(disband_room))
        .route("/:id/messages", get(room_messages))
}
