mod auth;
mod cache;
mod config;
mod db;
mod protocol;
mod rooms;
mod util;

use std::sync::Arc;

pub use auth::*;
pub use cache::*;
pub use config::*;
pub use db::*;
pub use protocol::*;
pub use rooms::*;

use log::info;
use tandem_core::{Config, Hub};

/// The hub every room connection is registered in
pub type RoomHub = Hub<RoomMessage>;

/// The tandem collab system, facilitating rooms, playback sync, and authentication.
pub struct Collab {
    context: CollabContext,

    pub rooms: RoomManager,
    pub auth: Auth<dyn Database>,
}

/// A type passed to various components of the collab system, to access state and deliver messages.
#[derive(Clone)]
pub struct CollabContext {
    pub config: CollabConfig,
    pub database: Arc<dyn Database>,
    pub cache: Arc<dyn RoomCache>,
    pub hub: Arc<RoomHub>,

    pub locks: Arc<RoomLocks>,
}

impl Collab {
    pub fn new(
        config: CollabConfig,
        hub_config: Config,
        database: Arc<dyn Database>,
        cache: Arc<dyn RoomCache>,
    ) -> Self {
        let context = CollabContext {
            config,
            database,
            cache,
            hub: Hub::new(hub_config),
            locks: Default::default(),
        };

        Self {
            rooms: RoomManager::new(&context),
            auth: Auth::new(&context.database),
            context,
        }
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.context.hub
    }

    /// Says goodbye to every connection and waits for them to close.
    /// Memberships are kept, clients are expected to come back.
    pub async fn shutdown(&self) -> bool {
        info!(
            "Shutting down, {} connection(s) open",
            self.context.hub.connection_count()
        );

        self.context
            .hub
            .shutdown(|room_id| {
                let payload = ErrorPayload {
                    code: "server_shutdown",
                    message: "The server is shutting down".to_string(),
                    current_state: None,
                };

                Some(Arc::new(ServerMessage::new(
                    room_id,
                    None,
                    ServerEvent::Error(payload),
                )))
            })
            .await
    }
}
