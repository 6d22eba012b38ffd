use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, ShakeError};

/// Configuration for the external simulation worker.
///
/// The worker is started once per submitted job with the job's parameters
/// appended as positional arguments after `args`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Executable to start for every job
    pub program: PathBuf,
    /// Fixed arguments placed before the job arguments (e.g. a script path
    /// when `program` is an interpreter)
    pub args: Vec<String>,
    /// Kill the worker and mark its job failed after this many seconds.
    /// `None` lets workers run forever.
    pub timeout_secs: Option<u64>,
    /// Address handed to workers for the completion callback.
    /// Defaults to the server's own listen address.
    pub notify_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./urgentshake.py"),
            args: Vec::new(),
            timeout_secs: None,
            notify_addr: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// JSON file holding the whole job table
    pub history_path: PathBuf,
    /// Directory searched for `<id>.zip` output archives
    pub output_dir: PathBuf,
    /// Upper bound on connections handled at the same time
    pub max_connections: usize,
    /// Size of the single read taken from each connection
    pub max_request_bytes: usize,
    pub read_timeout_ms: u64,
    pub worker: WorkerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:5001"
                .parse()
                .expect("default listen address is valid"),
            history_path: PathBuf::from("shake_history.json"),
            output_dir: PathBuf::from("."),
            max_connections: 64,
            max_request_bytes: 1024,
            read_timeout_ms: 5000,
            worker: WorkerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = path.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Resolve `host` and `port` to a listen address.
///
/// `host` may be an IPv4 or IPv6 literal (`0.0.0.0`, `::`) or a host name
/// such as `localhost`; the first resolved address is used.
pub async fn resolve_listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ShakeError::UnresolvedAddress(format!("{}:{}", host, port)))
}
