use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::JobRegistry;

pub mod connection;

pub use connection::ConnectionHandler;

/// TCP front end: one task per connection, at most `max_connections` at a time.
pub struct ShakeServer {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    limiter: Arc<Semaphore>,
}

impl ShakeServer {
    pub fn new(listener: TcpListener, registry: JobRegistry, config: &ServerConfig) -> Self {
        Self {
            listener,
            handler: Arc::new(ConnectionHandler::new(registry, config)),
            limiter: Arc::new(Semaphore::new(config.max_connections.max(1))),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// A permit is taken before each accept, so once `max_connections`
    /// requests are in flight new clients wait in the listen backlog.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            max_connections = self.limiter.available_permits(),
            "Starting shake server"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                handler.handle(stream, peer).await;
                drop(permit);
            });
        }

        tracing::info!("Shake server stopped accepting connections");
        Ok(())
    }
}
