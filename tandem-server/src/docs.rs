use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{gateway, rooms, schemas, serialized};

#[derive(OpenApi)]
#[openapi(
    paths(
        rooms::create_room,
        rooms::room,
        rooms::room_messages,
        rooms::disband_room,
        gateway::gateway,
    ),
    components(schemas(
        schemas::NewRoomSchema,
        serialized::User,
        serialized::Room,
        serialized::RoomMember,
        serialized::Song,
        serialized::Message,
    )),
    modifiers(&Security),
    info(
        description = "tandem-server exposes endpoints to create listening rooms and connect to them"
    ))
]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
