use log::info;
use std::net::SocketAddr;

use super::api::{routes, AppState};
use crate::error::{Error, Result};

pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serves the API until ctrl-c.
    pub async fn start(&self, host: &str, port: u16) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| Error::ConfigError(format!("Invalid listen address {}:{}: {}", host, port, e)))?;

        let (bound, server) = warp::serve(routes(self.state.clone()))
            .try_bind_with_graceful_shutdown(addr, async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                }
            })
            .map_err(|e| Error::InternalError(format!("Failed to bind {}: {}", addr, e)))?;

        info!("Web server listening on {}", bound);
        server.await;
        info!("Web server stopped");
        Ok(())
    }
}
