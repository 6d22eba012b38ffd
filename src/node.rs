use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::{JobRegistry, JobStore};
use crate::server::ShakeServer;
use crate::worker::WorkerLauncher;

/// A bound server together with everything it needs to run
pub struct Node {
    config: ServerConfig,
    listener: TcpListener,
}

impl Node {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address workers should report completion to.
    ///
    /// An explicit `notify_addr` wins; otherwise the bound address is used,
    /// with a wildcard IP replaced by loopback.
    pub fn notify_addr(&self) -> Result<String> {
        if let Some(addr) = &self.config.worker.notify_addr {
            return Ok(addr.clone());
        }
        let addr = self.local_addr()?;
        let ip = match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Ok(SocketAddr::new(ip, addr.port()).to_string())
    }

    /// Run the node.
    ///
    /// 1. Spawns the job registry task that owns the job table
    /// 2. Serves connections until `shutdown` is cancelled
    ///
    /// The registry stops by itself once the last in-flight request drops
    /// its handle.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let launcher = WorkerLauncher::new(self.config.worker.clone(), self.notify_addr()?);
        let store = JobStore::new(self.config.history_path.clone());

        tracing::info!(
            history = %self.config.history_path.display(),
            output_dir = %self.config.output_dir.display(),
            worker = %self.config.worker.program.display(),
            worker_timeout_secs = ?self.config.worker.timeout_secs,
            "Starting shake node"
        );

        let registry = JobRegistry::spawn(store, launcher);
        let server = ShakeServer::new(self.listener, registry, &self.config);
        server.run(shutdown).await
    }
}
