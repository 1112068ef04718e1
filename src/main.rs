use std::sync::Arc;

use colored::Colorize;
use config::TandemConfig;
use log::{error, info, warn};
use tandem_collab::{Collab, Database, DatabaseError, MemoryCache, MemoryDatabase, PgDatabase};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

use crate::logging::LogColor;

mod config;
mod logging;

pub struct Tandem {
    config: TandemConfig,
    collab: Arc<Collab>,
    runtime: Runtime,
}

#[derive(Debug, Error)]
pub enum TandemError {
    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),

    #[error("Environment variable {name} has an invalid value: {value}")]
    Config { name: &'static str, value: String },

    #[error("Server failed: {0}")]
    Server(#[from] std::io::Error),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Tandem {
    fn new(config: TandemConfig) -> Result<Self, TandemError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tandem-async")
            .build()
            .map_err(|e| TandemError::Fatal(e.to_string()))?;

        let database: Arc<dyn Database> = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                Arc::new(runtime.block_on(PgDatabase::new(url))?)
            }
            None => {
                warn!("TANDEM_DATABASE_URL is not set, rooms and messages are kept in memory");
                Arc::new(MemoryDatabase::default())
            }
        };

        // The hub spawns its heartbeat, so it needs the runtime
        let collab = {
            let _guard = runtime.enter();

            Collab::new(
                config.collab.clone(),
                config.hub.clone(),
                database,
                Arc::new(MemoryCache::default()),
            )
        };

        Ok(Self {
            config,
            collab: Arc::new(collab),
            runtime,
        })
    }

    fn run(self) -> Result<(), TandemError> {
        let collab = self.collab.clone();
        let port = self.config.port;

        self.runtime
            .block_on(tandem_server::run_server(collab, port, shutdown_signal()))?;

        info!("Shut down cleanly");
        Ok(())
    }
}

impl TandemError {
    fn hint(&self) -> String {
        match self {
            TandemError::Database(_) => "This is a database error. Make sure TANDEM_DATABASE_URL points to a running PostgreSQL instance with the schema applied, then try again.".to_string(),
            TandemError::Config { name, .. } => format!("Fix or unset {} and try again.", name),
            TandemError::Server(_) => "Make sure the port is not already in use, or pick another one with TANDEM_SERVER_PORT.".to_string(),
            TandemError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Could not listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested");
}

fn report(error: TandemError) {
    error!("{} Read the error below to troubleshoot the issue. If you think this might be a bug, please report it by making a GitHub issue.", "tandem failed!".bold().color(LogColor::Red));
    error!("{}", error);
    error!(
        "{}",
        format!("Hint: {}", error.hint())
            .color(LogColor::Dimmed)
            .italic()
    );
}

fn main() {
    let config = TandemConfig::from_env();
    let verbose = config.as_ref().map(|c| c.verbose).unwrap_or(false);

    if let Err(err) = logging::init_logger(verbose) {
        eprintln!("Could not initialize logging: {}", err);
        return;
    }

    let result = config.and_then(Tandem::new).and_then(|tandem| {
        info!("Initialized successfully.");
        tandem.run()
    });

    if let Err(error) = result {
        report(error);
    }
}
