//! Library crate for the key-value server service: configuration, the
//! listener, and the pieces behind it (session loop, command dispatch,
//! shared state, replication link).

mod commands;
mod replication;
mod session;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use state::AppState;

/// Resolved configuration, as provided by the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// `Some((host, port))` runs this instance as a replica.
    pub replica_of: Option<(String, u16)>,
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
}

/// Startup failures.  Runtime errors never surface here — a broken
/// connection only takes itself down.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("unable to load snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: kv_core::snapshot::SnapshotError,
    },
}

/// A bound, snapshot-loaded server that has not started accepting yet.
/// The two-step construction lets tests bind port 0 and read back the
/// address before serving.
pub struct Server {
    listener: TcpListener,
    state: AppState,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Server, ServerError> {
        let state = AppState::new(config.clone());

        if let (Some(dir), Some(dbfilename)) = (&config.dir, &config.dbfilename) {
            let path = PathBuf::from(dir).join(dbfilename);
            let entries =
                kv_core::snapshot::read_file(&path).map_err(|source| ServerError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
            let loaded = state.load_snapshot(entries).await;
            info!(keys = loaded, path = %path.display(), "snapshot loaded");
        }

        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| ServerError::Bind {
                port: config.port,
                source,
            })?;
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        Ok(Server { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Accept connections until the shutdown signal.  A replica also
    /// runs its master link alongside; the link failing never takes the
    /// listener down.
    pub async fn serve(self) {
        use futures::{future::select_all, future::FutureExt, pin_mut};
        use std::future::Future;
        use std::pin::Pin;

        let Server { listener, state } = self;

        if let Some((host, port)) = state.config.replica_of.clone() {
            let listening_port = listener
                .local_addr()
                .map_or(state.config.port, |addr| addr.port());
            tokio::spawn(replication::run(state.clone(), host, port, listening_port));
        }

        let fut_accept = accept_loop(listener, state).fuse();
        let fut_sig = shutdown_signal().fuse();
        pin_mut!(fut_accept, fut_sig);
        let futures: Vec<Pin<&mut (dyn Future<Output = ()> + Send)>> = vec![fut_accept, fut_sig];
        select_all(futures).await;
    }
}

/// Bind and serve until shutdown.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let server = Server::bind(config).await?;
    server.serve().await;
    Ok(())
}

async fn accept_loop(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "client connected");
                tokio::spawn(session::handle(state.clone(), stream, addr));
            }
            Err(error) => warn!(%error, "failed to accept connection"),
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
