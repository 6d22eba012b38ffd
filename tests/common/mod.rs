//! Shared helpers for registry and server integration tests.
//!
//! Spawns servers on ephemeral ports with a scratch directory for the job
//! table and output archives.

#![allow(dead_code)]

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use shake_server::client;
use shake_server::config::{ServerConfig, WorkerConfig};
use shake_server::node::Node;
use shake_server::protocol::Request;
use shake_server::scheduler::{JobParams, JobRegistry, JobStore};
use shake_server::worker::WorkerLauncher;

pub const HISTORY_FILE: &str = "shake_history.json";

/// Worker that accepts any arguments and exits immediately
pub fn noop_worker() -> WorkerConfig {
    WorkerConfig::new("true")
}

/// Worker that never finishes on its own
pub fn sleeping_worker() -> WorkerConfig {
    WorkerConfig::new("sh").with_arg("-c").with_arg("sleep 30")
}

pub fn missing_worker() -> WorkerConfig {
    WorkerConfig::new("/nonexistent/urgentshake_12345")
}

pub fn sample_params() -> JobParams {
    JobParams::new(5.2, 12.3, 45.1, 10.0)
}

/// Registry backed by `dir/shake_history.json`, running on the current runtime
pub fn spawn_registry(dir: &Path, worker: WorkerConfig) -> JobRegistry {
    let store = JobStore::new(dir.join(HISTORY_FILE));
    let launcher = WorkerLauncher::new(worker, "127.0.0.1:5001");
    JobRegistry::spawn(store, launcher)
}

/// Handle to a running server
pub struct TestServer {
    pub addr: String,
    pub dir: TempDir,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(worker: WorkerConfig) -> Self {
        Self::start_with(|config| config.with_worker(worker)).await
    }

    /// Start a server, letting the caller adjust the test configuration
    pub async fn start_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let dir = tempfile::tempdir().expect("create scratch dir");
        std::fs::create_dir_all(dir.path().join("output")).expect("create output dir");

        let base = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_history_path(dir.path().join(HISTORY_FILE))
            .with_output_dir(dir.path().join("output"))
            .with_worker(noop_worker());
        let config = configure(base);

        let node = Node::bind(config).await.expect("bind test server");
        let addr = node.local_addr().unwrap().to_string();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            node.run(token).await.expect("server run");
        });

        Self {
            addr,
            dir,
            shutdown,
            handle,
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.path().join(HISTORY_FILE)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub async fn send(&self, request: Request) -> String {
        client::send_request(&self.addr, &request)
            .await
            .expect("request should succeed")
    }

    /// Send a raw command line and read the reply until the server closes
    pub async fn send_raw(&self, line: &str) -> String {
        let mut stream = TcpStream::connect(&self.addr).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8(response).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

/// Poll `condition` until it holds or `timeout_duration` elapses
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout_duration;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition().await
}

pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration).await;
    assert!(result, "{}", message);
}

/// Log output collected from a subscriber installed on the test thread.
///
/// Only events emitted on the installing thread are seen, which covers
/// every task of a current-thread test runtime.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
