use invitegate_core::DeliveryError;
use thiserror::Error;

pub type TelegramResult<T> = Result<T, TelegramError>;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("invalid telegram config: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API answered `ok: false`.
    #[error("bot api error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("undecodable bot api response: {0}")]
    Decode(String),
}

impl TelegramError {
    /// Rate limits and server-side failures may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TelegramError::Http(_) => true,
            TelegramError::Api { code, .. } => *code == 429 || *code >= 500,
            TelegramError::Config(_) | TelegramError::Decode(_) => false,
        }
    }
}

impl From<TelegramError> for DeliveryError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Http(e) if e.is_timeout() => DeliveryError::Timeout,
            TelegramError::Http(e) => DeliveryError::Transport(e.to_string()),
            TelegramError::Api {
                code: 429,
                retry_after,
                ..
            } => DeliveryError::Transport(format!(
                "rate limited, retry after {}s",
                retry_after.unwrap_or(1)
            )),
            TelegramError::Api {
                code, description, ..
            } if code >= 500 => DeliveryError::Transport(format!("{code}: {description}")),
            TelegramError::Api {
                code, description, ..
            } => DeliveryError::Rejected(format!("{code}: {description}")),
            TelegramError::Config(msg) | TelegramError::Decode(msg) => DeliveryError::Rejected(msg),
        }
    }
}
