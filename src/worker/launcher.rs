use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::scheduler::Job;

/// Environment variable carrying the server address for the completion callback
pub const SERVER_ADDR_ENV: &str = "SHAKE_SERVER_ADDR";
/// Environment variable carrying the job ID
pub const JOB_ID_ENV: &str = "SHAKE_JOB_ID";

/// How a supervised worker ended
#[derive(Debug)]
pub enum WorkerExit {
    Exited(ExitStatus),
    /// Still running when the configured timeout expired; the process was killed
    TimedOut(Duration),
    /// Killed because its job was removed by a reset
    Cancelled,
    WaitFailed(std::io::Error),
}

/// Starts simulation workers for registered jobs.
///
/// Workers run detached from the request that created them: `launch`
/// returns as soon as the process exists and the caller decides whether to
/// [`supervise`] it.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    config: WorkerConfig,
    notify_addr: String,
}

impl WorkerLauncher {
    pub fn new(config: WorkerConfig, notify_addr: impl Into<String>) -> Self {
        Self {
            config,
            notify_addr: notify_addr.into(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    /// Spawn the worker for `job` without waiting for it.
    pub fn launch(&self, job: &Job) -> std::io::Result<Child> {
        let dropped = job.params.unpassable_angles();
        if !dropped.is_empty() {
            tracing::warn!(
                job_id = job.id,
                dropped = ?dropped,
                "Angles given after a missing one cannot be passed to the worker"
            );
        }

        let args = job.worker_args();
        tracing::info!(
            job_id = job.id,
            program = %self.config.program.display(),
            args = ?args,
            "Launching worker"
        );

        Command::new(&self.config.program)
            .args(&self.config.args)
            .args(&args)
            .env(SERVER_ADDR_ENV, &self.notify_addr)
            .env(JOB_ID_ENV, job.id.to_string())
            .stdin(Stdio::null())
            .spawn()
    }
}

/// Wait for a worker to exit.
///
/// The worker is killed once `timeout` has passed or when `cancel` fires,
/// whichever comes first.
pub async fn supervise(
    job_id: u64,
    mut child: Child,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) -> WorkerExit {
    let deadline = async move {
        match timeout {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    let stopped = tokio::select! {
        waited = child.wait() => return reaped(job_id, waited),
        limit = deadline => WorkerExit::TimedOut(limit),
        _ = cancel.cancelled() => WorkerExit::Cancelled,
    };

    if let Err(e) = child.kill().await {
        tracing::warn!(job_id, error = %e, "Failed to kill worker");
    }
    match &stopped {
        WorkerExit::TimedOut(limit) => {
            tracing::warn!(job_id, timeout_secs = limit.as_secs_f64(), "Worker timed out");
        }
        _ => tracing::info!(job_id, "Worker stopped, its job is gone"),
    }
    stopped
}

fn reaped(job_id: u64, waited: std::io::Result<ExitStatus>) -> WorkerExit {
    match waited {
        Ok(status) => {
            tracing::info!(job_id, exit_code = ?status.code(), "Worker exited");
            WorkerExit::Exited(status)
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to wait for worker");
            WorkerExit::WaitFailed(e)
        }
    }
}
