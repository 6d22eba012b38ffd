//! Line protocol spoken over TCP.
//!
//! A client opens a connection, writes one command line, reads the reply
//! until the server closes the connection. Nothing is pipelined and a
//! connection never carries a second request.
//!
//! `download` is the one command with a binary reply: an 8-byte big-endian
//! length followed by that many bytes, or the literal [`NO_DATA`].

pub mod request;
pub mod response;

pub use request::{Request, RequestError};
pub use response::Response;

/// Reply to `download` when no archive exists for the job
pub const NO_DATA: &str = "NO DATA";

/// Size of the length prefix in front of a `download` payload
pub const LENGTH_PREFIX_LEN: usize = 8;
