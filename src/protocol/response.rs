use std::fmt;

use serde::Serialize;

use crate::protocol::request::RequestError;
use crate::scheduler::job::format_float;
use crate::scheduler::{Job, JobStatus, SubmitOutcome};

pub const NO_JOBS: &str = "No jobs recorded.";
pub const INVALID_JSON: &str = "Error: Invalid JSON format in request.";
pub const UNKNOWN_COMMAND: &str = "Unknown command.";
pub const ALL_DELETED: &str = "All jobs deleted.";
pub const INTERNAL_ERROR: &str = "Error: Internal server error.";

/// Text reply written back for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Submitted(u64),
    SpawnFailed { id: u64, reason: String },
    Jobs(Vec<Job>),
    Info(Job),
    Completed(u64),
    Deleted(u64),
    NotFound(u64),
    Reset,
    InvalidJson,
    InvalidJobId(String),
    UnknownCommand,
    /// The job table could not be read or written
    Internal,
}

/// `info` payload: the stored record plus its derived status
#[derive(Serialize)]
struct JobInfo<'a> {
    #[serde(flatten)]
    job: &'a Job,
    status: JobStatus,
}

impl From<SubmitOutcome> for Response {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Accepted(id) => Response::Submitted(id),
            SubmitOutcome::SpawnFailed { id, reason } => Response::SpawnFailed { id, reason },
        }
    }
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::InvalidJson => Response::InvalidJson,
            RequestError::InvalidJobId(arg) => Response::InvalidJobId(arg),
            RequestError::UnknownCommand => Response::UnknownCommand,
        }
    }
}

/// One `list` line: `ID <id> - <timestamp> - Magnitude: <m> - Status: <status>`
pub fn summary_line(job: &Job) -> String {
    format!(
        "ID {} - {} - Magnitude: {} - Status: {}",
        job.id,
        job.timestamp,
        format_float(job.params.magnitude),
        job.status()
    )
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Submitted(id) => write!(f, "{}", id),
            Response::SpawnFailed { id, reason } => {
                write!(f, "Error: Worker for job {} could not be started: {}", id, reason)
            }
            Response::Jobs(jobs) if jobs.is_empty() => f.write_str(NO_JOBS),
            Response::Jobs(jobs) => {
                let lines: Vec<String> = jobs.iter().map(summary_line).collect();
                f.write_str(&lines.join("\n"))
            }
            Response::Info(job) => {
                let info = JobInfo {
                    job,
                    status: job.status(),
                };
                let text = serde_json::to_string_pretty(&info).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
            Response::Completed(id) => write!(f, "Job ID {} marked as completed.", id),
            Response::Deleted(id) => write!(f, "Job ID {} deleted.", id),
            Response::NotFound(id) => write!(f, "Job ID {} not found.", id),
            Response::Reset => f.write_str(ALL_DELETED),
            Response::InvalidJson => f.write_str(INVALID_JSON),
            Response::InvalidJobId(arg) => write!(f, "Error: Invalid job ID '{}'.", arg),
            Response::UnknownCommand => f.write_str(UNKNOWN_COMMAND),
            Response::Internal => f.write_str(INTERNAL_ERROR),
        }
    }
}
