//! Client side of the line protocol, used by the CLI and by workers
//! reporting completion.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, ShakeError};
use crate::protocol::{Request, LENGTH_PREFIX_LEN, NO_DATA};

async fn open(addr: &str, request: &Request) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.encode()?.as_bytes()).await?;
    Ok(stream)
}

/// Send one request and return the text reply.
pub async fn send_request(addr: &str, request: &Request) -> Result<String> {
    let mut stream = open(addr, request).await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Tell the server that `job_id` has finished. Returns the server's reply.
pub async fn notify_completion(addr: &str, job_id: u64) -> Result<String> {
    let response = send_request(addr, &Request::Complete(job_id)).await?;
    tracing::info!(job_id, response = %response, "Completion reported");
    Ok(response)
}

/// Fetch the output archive of `job_id` into `dir/<job_id>.zip`.
pub async fn download(addr: &str, job_id: u64, dir: &Path) -> Result<PathBuf> {
    let mut stream = open(addr, &Request::Download(job_id)).await?;

    let mut header = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = stream.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if header[..filled].starts_with(NO_DATA.as_bytes()) {
        return Err(ShakeError::NoData(job_id));
    }
    if filled < header.len() {
        return Err(ShakeError::InvalidResponse(format!(
            "expected {}-byte length prefix, got {} bytes",
            LENGTH_PREFIX_LEN, filled
        )));
    }

    let expected = u64::from_be_bytes(header);
    let path = dir.join(format!("{}.zip", job_id));
    let mut file = tokio::fs::File::create(&path).await?;
    let received = tokio::io::copy(&mut (&mut stream).take(expected), &mut file).await?;
    file.flush().await?;

    if received != expected {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ShakeError::IncompleteTransfer { expected, received });
    }

    tracing::debug!(job_id, bytes = received, path = %path.display(), "Archive downloaded");
    Ok(path)
}
