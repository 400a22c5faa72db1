//! HTTP server with ordered graceful shutdown

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

use crate::error::{Error, Result};
use crate::state::AppState;

/// Server instance
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a server around the shared state
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Bind and serve until a shutdown signal, then tear down in order:
    /// dispatcher → limiters → job engine → hub → HTTP.
    pub async fn serve(self, app: Router) -> Result<()> {
        let host: std::net::IpAddr = self
            .state
            .config
            .server
            .host
            .parse()
            .map_err(|_| Error::bad_request("server.host is not an IP address"))?;
        let addr = SocketAddr::from((host, self.state.config.server.port));

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("aybase listening on {addr}");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        tracing::info!("http server stopped, draining background work");
        self.state.shutdown().await;
        tracing::info!("shutdown complete");
        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
