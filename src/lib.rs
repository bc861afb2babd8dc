pub mod clienv;
pub mod config;
pub mod connect_config;
pub mod daemon;
pub mod error;
pub mod http_server;

pub use config::Config;
pub use error::{Result, WorkerError};
