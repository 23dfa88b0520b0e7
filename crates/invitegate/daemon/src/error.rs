//! Daemon errors. Only startup can fail; once the update loop runs, event
//! failures are handled inside the gate controller.

use invitegate_storage::StorageError;
use invitegate_telegram::TelegramError;
use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("gateway error: {0}")]
    Gateway(#[from] TelegramError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}
