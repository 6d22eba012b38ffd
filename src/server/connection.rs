use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::{Result, ShakeError};
use crate::protocol::{Request, Response, NO_DATA};
use crate::scheduler::JobRegistry;

/// Serves a single request per connection
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    registry: JobRegistry,
    output_dir: PathBuf,
    max_request_bytes: usize,
    read_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(registry: JobRegistry, config: &ServerConfig) -> Self {
        Self {
            registry,
            output_dir: config.output_dir.clone(),
            max_request_bytes: config.max_request_bytes,
            read_timeout: config.read_timeout(),
        }
    }

    pub async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.serve(&mut stream).await {
            tracing::warn!(peer = %peer, error = %e, "Connection failed");
        }
    }

    /// Read one request from `stream`, answer it, then close the write side.
    pub async fn serve<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.max_request_bytes];
        let n = match tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                tracing::debug!("Client sent nothing before the read timeout");
                return Ok(());
            }
        };
        let line = String::from_utf8_lossy(&buf[..n]);
        tracing::debug!(request = %line.trim(), "Request received");

        match Request::parse(&line) {
            Ok(request) => self.dispatch(request, stream).await?,
            Err(e) => {
                let response = Response::from(e);
                stream.write_all(response.to_string().as_bytes()).await?;
            }
        }

        stream.shutdown().await?;
        Ok(())
    }

    /// Run `request` and write its reply to `out`.
    pub async fn dispatch<W>(&self, request: Request, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Request::Download(id) = request {
            return self.send_archive(id, out).await;
        }

        let response = self.respond(request).await;
        out.write_all(response.to_string().as_bytes()).await?;
        Ok(())
    }

    /// Text reply for every request except `download`
    pub async fn respond(&self, request: Request) -> Response {
        let result = match request {
            Request::Run(params) => self.registry.submit(params).await.map(Response::from),
            Request::List => self.registry.list().await.map(Response::Jobs),
            Request::Info(id) => self
                .registry
                .info(id)
                .await
                .map(|job| job.map_or(Response::NotFound(id), Response::Info)),
            Request::Complete(id) => self.registry.complete(id).await.map(|found| {
                if found {
                    Response::Completed(id)
                } else {
                    Response::NotFound(id)
                }
            }),
            Request::Delete(id) => self.registry.delete(id).await.map(|found| {
                if found {
                    Response::Deleted(id)
                } else {
                    Response::NotFound(id)
                }
            }),
            Request::Reset => self.registry.reset().await.map(|()| Response::Reset),
            // binary reply, only reachable through `dispatch`
            Request::Download(_) => Ok(Response::UnknownCommand),
        };

        result.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Job registry request failed");
            Response::Internal
        })
    }

    /// Stream `<output_dir>/<id>.zip` behind its big-endian length.
    async fn send_archive<W>(&self, id: u64, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let path = self.output_dir.join(format!("{}.zip", id));
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        job_id = id,
                        path = %path.display(),
                        error = %e,
                        "Cannot open archive"
                    );
                }
                out.write_all(NO_DATA.as_bytes()).await?;
                return Ok(());
            }
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            out.write_all(NO_DATA.as_bytes()).await?;
            return Ok(());
        }

        let len = metadata.len();
        out.write_all(&len.to_be_bytes()).await?;
        let sent = tokio::io::copy(&mut file.take(len), out).await?;
        if sent != len {
            return Err(ShakeError::IncompleteTransfer {
                expected: len,
                received: sent,
            });
        }

        tracing::info!(job_id = id, bytes = len, "Archive sent");
        Ok(())
    }
}
