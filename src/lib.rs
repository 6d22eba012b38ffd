pub mod client;
pub mod config;
pub mod error;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod worker;
