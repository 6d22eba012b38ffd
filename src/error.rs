use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job registry has shut down")]
    RegistryClosed,

    #[error("No data available for job {0}")]
    NoData(u64),

    #[error("Incomplete transfer: expected {expected} bytes, received {received}")]
    IncompleteTransfer { expected: u64, received: u64 },

    #[error("Cannot resolve listen address {0}")]
    UnresolvedAddress(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ShakeError>;
