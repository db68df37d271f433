pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
mod handler;
pub mod kernel;
pub mod rib;
pub mod speaker;
mod utils;

pub use config::{ConfigError, SyncConfig};
pub use handler::{run, serve, Handler, SyncError};
