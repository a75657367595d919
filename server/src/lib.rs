#![deny(unsafe_code, unused_must_use)]

pub mod access;
mod api;
pub mod archive;
pub mod config;
pub mod database;
mod error;
pub mod fuzzy;
pub mod html;
pub mod maintenance;
pub mod matching;
pub mod store;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::extract::Extension;
use axum::http::Uri;
use axum::Router;
use sea_orm::{Database, DatabaseConnection};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use config::Settings;
use database::migration::{Migrator, MigratorTrait};
use store::Store;

pub use error::{ServerError, ServerResult};

pub type State = Arc<StateInner>;

/// Global server state.
#[derive(Debug)]
pub struct StateInner {
    /// The merged configuration.
    pub config: Settings,

    /// Handle to the metadata database.
    database: OnceCell<DatabaseConnection>,

    /// The blob store.
    pub store: Store,
}

impl StateInner {
    /// Opens the blob store (running the startup scan) and wraps the
    /// shared server state.
    pub async fn new(config: Settings) -> Result<State> {
        let root = config.cache_dir.clone();
        let store = task::spawn_blocking(move || Store::open(root)).await??;

        Ok(Arc::new(Self {
            config,
            database: OnceCell::new(),
            store,
        }))
    }

    /// Returns a handle to the database.
    pub async fn database(&self) -> ServerResult<&DatabaseConnection> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(database_url(&self.config.db_file))
                    .await
                    .map_err(ServerError::database_error)
            })
            .await
    }
}

fn database_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// The fallback route.
async fn fallback(_: Uri) -> ServerError {
    ServerError::NotFound
}

/// Assembles the router with all middleware attached.
pub fn build_router(state: State) -> Router {
    Router::new()
        .merge(api::get_router())
        .fallback(fallback)
        .layer(Extension(state))
        .layer(CatchPanicLayer::new())
}

/// Runs database migrations.
pub async fn run_migrations(state: &State) -> Result<()> {
    tracing::info!("Running migrations");
    let db = state.database().await?;
    Migrator::up(db, None).await?;
    Ok(())
}

/// Runs the HTTP server until the token is cancelled.
pub async fn run_server(state: State, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(state.clone());
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                state.config.host, state.config.port
            )
        })?;

    tracing::info!("Listening on {addr}");

    match &state.config.cert_and_key {
        Some((cert, key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .context("Unable to load the TLS certificate or key")?;

            let handle = axum_server::Handle::new();
            let watcher = handle.clone();
            let token = shutdown.clone();
            task::spawn(async move {
                token.cancelled().await;
                watcher.graceful_shutdown(None);
            });

            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        }
    }

    Ok(())
}
