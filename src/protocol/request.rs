use crate::error::Result;
use crate::scheduler::JobParams;

/// One command line sent by a client
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Run(JobParams),
    List,
    Info(u64),
    Complete(u64),
    Delete(u64),
    Reset,
    Download(u64),
}

/// Why a command line could not be turned into a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    InvalidJson,
    InvalidJobId(String),
    UnknownCommand,
}

impl Request {
    /// Parse a command line. The first whitespace-delimited token is the
    /// command; the rest of the line is its argument.
    pub fn parse(line: &str) -> std::result::Result<Self, RequestError> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "run" => serde_json::from_str(rest)
                .map(Request::Run)
                .map_err(|_| RequestError::InvalidJson),
            "list" if rest.is_empty() => Ok(Request::List),
            "reset" if rest.is_empty() => Ok(Request::Reset),
            "info" => parse_job_id(rest).map(Request::Info),
            "complete" => parse_job_id(rest).map(Request::Complete),
            "delete" => parse_job_id(rest).map(Request::Delete),
            "download" => parse_job_id(rest).map(Request::Download),
            _ => Err(RequestError::UnknownCommand),
        }
    }

    /// Command line for this request as sent on the wire
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Request::Run(params) => format!("run {}", serde_json::to_string(params)?),
            Request::List => "list".to_string(),
            Request::Info(id) => format!("info {}", id),
            Request::Complete(id) => format!("complete {}", id),
            Request::Delete(id) => format!("delete {}", id),
            Request::Reset => "reset".to_string(),
            Request::Download(id) => format!("download {}", id),
        })
    }
}

fn parse_job_id(arg: &str) -> std::result::Result<u64, RequestError> {
    arg.parse()
        .map_err(|_| RequestError::InvalidJobId(arg.to_string()))
}
