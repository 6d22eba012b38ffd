//! Simulation workers.
//!
//! A worker is an external program started once per job. The server does
//! not wait for it: the worker reports back on its own by sending
//! `complete <id>` to the server (see [`crate::client::notify_completion`]).
//!
//! # Components
//!
//! - [`WorkerLauncher`]: builds the command line and spawns the process
//! - [`supervise`]: reaps the process and enforces the optional timeout
//!
//! # Invocation
//!
//! ```text
//! <program> [args...] <job_id> <magnitude> <longitude> <latitude> <depth> [strike [dip [rake]]]
//! ```
//!
//! The worker also receives `SHAKE_SERVER_ADDR` and `SHAKE_JOB_ID` in its
//! environment. Its exit status is only logged; a job completes when the
//! worker says so.

pub mod launcher;

pub use launcher::{supervise, WorkerExit, WorkerLauncher};
