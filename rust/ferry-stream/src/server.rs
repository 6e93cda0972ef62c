//! TCP server for accepting ferry connections.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use ferry_session::{Router, SessionConfig, SessionError, accept, env_parse};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::tcp_link;

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// Applied to every accepted session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:50051".to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, with `FERRY_LISTEN_ADDR` and the session variables applied.
    pub fn from_env() -> Self {
        let mut config = Self {
            session: SessionConfig::from_env(),
            ..Self::default()
        };
        if let Some(addr) = env_parse::<String>("FERRY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        config
    }

    pub fn with_listen_addr(mut self, listen_addr: impl Into<String>) -> Self {
        self.listen_addr = listen_addr.into();
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// A TCP server that runs one session per accepted connection, all sharing
/// one [`Router`].
pub struct Server {
    router: Arc<Router>,
    config: ServerConfig,
}

impl Server {
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, operations = ?self.router.operations(), "listening");
        Ok(listener)
    }

    /// Accept connections forever.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        self.serve_with_shutdown(listener, std::future::pending::<()>())
            .await
    }

    /// Accept connections until `shutdown` completes. Sessions already running
    /// are left to finish on their own.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> io::Result<()> {
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!("no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            info!(%peer, "accepted connection");
            let router = Arc::clone(&self.router);
            let config = self.config.session.clone();
            tokio::spawn(async move {
                match serve_connection(stream, router, config).await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(e) => warn!(%peer, error = %e, "connection failed"),
                }
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    router: Arc<Router>,
    config: SessionConfig,
) -> Result<(), SessionError> {
    let (_handle, driver) = accept(tcp_link(stream)?, config, Some(router)).await?;
    driver.run().await
}
