use std::borrow::Cow;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query,
    },
    response::Response,
    routing::get,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use log::{debug, warn};
use tandem_collab::{
    ClientMessage, ErrorPayload, Mode, RoomError, RoomManager, RoomMessage, ServerEvent,
    ServerMessage, UserData,
};
use tandem_core::{CloseReason, ConnectionHandle, Outbound, OutboundReceiver};

use crate::{
    auth::Session, context::ServerContext, errors::ServerResult, schemas::GatewayQuery, Router,
};

#[utoipa::path(
    get,
    path = "/v1/gateway/{id}",
    tag = "gateway",
    params(
        ("id" = String, Path, description = "The room to connect to"),
        GatewayQuery
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 101, description = "Upgraded to a websocket carrying room events"),
        (status = 401, description = "Missing or invalid session"),
        (status = 404, description = "The room doesn't exist or is closed")
    )
)]
async fn gateway(
    session: Session,
    context: ServerContext,
    Path(room_id): Path<String>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> ServerResult<Response> {
    // Fail before upgrading when we already know the join can't work
    context.collab.rooms.room(&room_id).await?;

    let mode = query.mode.unwrap_or_default();
    let user = session.user;

    Ok(ws.on_upgrade(move |socket| run_connection(socket, context, room_id, user, mode)))
}

async fn run_connection(
    mut socket: WebSocket,
    context: ServerContext,
    room_id: String,
    user: UserData,
    mode: Mode,
) {
    let rooms = &context.collab.rooms;

    let session = match rooms.join(&room_id, &user, mode).await {
        Ok(session) => session,
        Err(err) => {
            debug!("User {} could not join room {}: {}", user.id, room_id, err);
            reject(&mut socket, &room_id, err).await;
            return;
        }
    };

    let handle = session.registration.handle;
    let (sink, stream) = socket.split();

    tokio::join!(
        read_frames(stream, &handle, rooms),
        write_frames(sink, session.registration.outbound, &handle)
    );

    let reason = handle.closed().await;
    rooms.disconnect(&handle, reason).await;
}

/// Reads client frames until either side closes the connection
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    handle: &ConnectionHandle,
    rooms: &RoomManager,
) {
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = handle.closed() => return,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!("Socket of connection {} failed: {}", handle.id, err);
                handle.close(CloseReason::ClientClosed);
                return;
            }
            None => {
                handle.close(CloseReason::ClientClosed);
                return;
            }
        };

        handle.mark_alive();

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => rooms.handle_message(handle, message).await,
                Err(err) => {
                    debug!("Malformed frame on connection {}: {}", handle.id, err);
                    handle.close(CloseReason::MalformedFrame);
                    return;
                }
            },
            Message::Binary(_) => {
                handle.close(CloseReason::MalformedFrame);
                return;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                handle.close(CloseReason::ClientClosed);
                return;
            }
        }
    }
}

/// Writes queued messages until the connection closes, then flushes what's left
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver<RoomMessage>,
    handle: &ConnectionHandle,
) {
    loop {
        tokio::select! {
            biased;

            item = outbound.recv() => {
                let Some(item) = item else {
                    break;
                };

                if write_item(&mut sink, item).await.is_err() {
                    handle.close(CloseReason::ClientClosed);
                    return;
                }
            }
            _ = handle.closed() => break,
        }
    }

    // Goodbyes like room_disband are queued right before the close
    while let Ok(item) = outbound.try_recv() {
        if write_item(&mut sink, item).await.is_err() {
            return;
        }
    }

    let reason = handle.closed().await;
    let frame = CloseFrame {
        code: close_code_for(reason),
        reason: Cow::Borrowed(reason.as_str()),
    };

    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        debug!("Could not close connection {}: {}", handle.id, err);
    }
}

async fn write_item(
    sink: &mut SplitSink<WebSocket, Message>,
    item: Outbound<RoomMessage>,
) -> Result<(), axum::Error> {
    match item {
        Outbound::Message(message) => match serde_json::to_string(&*message) {
            Ok(text) => sink.send(Message::Text(text)).await,
            Err(err) => {
                warn!("Failed to serialize {} event: {}", message.event_type(), err);
                Ok(())
            }
        },
        Outbound::Ping => sink.send(Message::Ping(vec![])).await,
    }
}

/// Tells the client why it can't join, then closes the socket
async fn reject(socket: &mut WebSocket, room_id: &str, error: RoomError) {
    let code = error.code();
    let message = ServerMessage::new(
        room_id,
        None,
        ServerEvent::Error(ErrorPayload {
            code,
            message: error.to_string(),
            current_state: None,
        }),
    );

    if let Ok(text) = serde_json::to_string(&message) {
        let _ = socket.send(Message::Text(text)).await;
    }

    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed(code),
    };

    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::Left | CloseReason::RoomDisbanded | CloseReason::ClientClosed => {
            close_code::NORMAL
        }
        CloseReason::ServerShutdown => close_code::AWAY,
        CloseReason::MalformedFrame => close_code::UNSUPPORTED,
        CloseReason::ReplacedByNewConnection
        | CloseReason::HeartbeatTimeout
        | CloseReason::SlowConsumer => close_code::POLICY,
    }
}

pub fn router() -> Router {
    Router::new().route("/:id", get(gateway))
}
