use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::scheduler::job::Job;

/// Flat-file job table.
///
/// The whole table lives in one JSON array. Every call reads or rewrites the
/// complete file; callers are expected to serialize access (see
/// [`JobRegistry`](crate::scheduler::JobRegistry)).
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table. A missing or empty file is an empty table.
    pub async fn load(&self) -> Result<Vec<Job>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    /// Replace the table on disk.
    ///
    /// The new contents go to a sibling temp file which is then renamed over
    /// the table, so readers see either the old or the new table.
    pub async fn save(&self, jobs: &[Job]) -> Result<()> {
        let data = serde_json::to_vec_pretty(jobs)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), jobs = jobs.len(), "Job table saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
