mod auth;
mod context;
mod docs;
mod errors;
mod gateway;
mod rooms;
mod schemas;
mod serialized;

use std::{
    future::Future,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use axum::routing::get;
use log::info;
use tandem_collab::Collab;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router = axum::Router<ServerContext>;

/// Starts the tandem server and runs it until `shutdown` resolves.
///
/// Open connections are told the server is going away and drained before this returns.
pub async fn run_server<F>(collab: Arc<Collab>, port: u16, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let context = ServerContext {
        collab: collab.clone(),
    };

    let version_one_router = Router::new()
        .nest("/rooms", rooms::router())
        .nest("/gateway", gateway::router());

    let root_router = Router::new()
        .nest("/v1", version_one_router)
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, root_router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.await;
            collab.shutdown().await;
        })
        .await
}
