//! invitegate daemon library
//!
//! - configuration loading and validation
//! - storage, gateway and provider wiring
//! - the update loop with graceful shutdown

pub mod config;
pub mod error;
pub mod runtime;

pub use config::{DaemonConfig, LoggingConfig, StorageConfig};
pub use error::{DaemonError, DaemonResult};
pub use runtime::Daemon;
