use invitegate_storage::StorageError;
use thiserror::Error;

/// Result type for gatekeeper operations.
pub type GateResult<T> = Result<T, GateError>;

/// Rejected admin input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("value {value} is outside the allowed range {min}..={max}")]
    InvalidRange { value: i64, min: u32, max: u32 },

    #[error("`{0}` is not a number")]
    NotANumber(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

/// Failure reported by the messaging gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network or platform-side failure that may succeed on retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform refused the call (missing rights, unknown message, ...).
    #[error("rejected by platform: {0}")]
    Rejected(String),

    #[error("gateway call timed out")]
    Timeout,
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transport(_) | DeliveryError::Timeout)
    }
}

/// Failure reported by the completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("provider call timed out")]
    Timeout,

    #[error("malformed provider reply: {0}")]
    Malformed(String),

    #[error("provider not configured")]
    NotConfigured,
}

/// Gatekeeper error taxonomy.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("completion provider not configured")]
    NotConfigured,

    #[error("delivery failed: {0}")]
    TransientDelivery(#[from] DeliveryError),

    #[error("completion failed: {0}")]
    Provider(#[from] ProviderFailure),

    #[error("store failure: {0}")]
    Store(#[from] StorageError),

    #[error("permission denied: admin rights required")]
    PermissionDenied,
}

/// Coarse classification the controller applies its error policy on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotConfigured,
    TransientDelivery,
    Provider,
    Store,
    PermissionDenied,
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Validation(_) => ErrorKind::Validation,
            GateError::NotConfigured | GateError::Provider(ProviderFailure::NotConfigured) => {
                ErrorKind::NotConfigured
            }
            GateError::TransientDelivery(_) => ErrorKind::TransientDelivery,
            GateError::Provider(_) => ErrorKind::Provider,
            GateError::Store(_) => ErrorKind::Store,
            GateError::PermissionDenied => ErrorKind::PermissionDenied,
        }
    }
}
