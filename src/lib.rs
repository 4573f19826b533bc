pub mod cli;
pub mod config;
pub mod daemon;
pub mod endpoint;
pub mod logging;
pub mod protocol;
pub mod web;

pub use config::{Config, ConfigError, ResolvedConfig};
pub use daemon::{DaemonError, SyncDaemon};
pub use endpoint::{EndpointHandle, SyncEndpoint, TextField};
pub use protocol::{DecodeError, SyncMessage};
pub use web::LiveServer;
