//! Bot API client.

use crate::error::{TelegramError, TelegramResult};
use crate::types::{ApiEnvelope, Update, User};
use invitegate_storage::UserId;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Update kinds the gatekeeper subscribes to.
pub const ALLOWED_UPDATES: [&str; 4] = ["message", "chat_member", "callback_query", "my_chat_member"];

/// Gateway settings, the `telegram` section of the daemon config.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll wait passed to `getUpdates`
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Timeout for every other call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    15
}

/// Who the bot is, from `getMe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct BotApi {
    client: Client,
    /// `{api_base}/bot{token}`
    base: String,
    request_timeout: Duration,
    poll_timeout_secs: u64,
}

impl std::fmt::Debug for BotApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApi")
            .field("request_timeout", &self.request_timeout)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl BotApi {
    pub fn new(config: &TelegramConfig) -> TelegramResult<Self> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            return Err(TelegramError::Config("bot token is empty".into()));
        }
        // Per-request timeouts are set on every call.
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", config.api_base.trim_end_matches('/'), token),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    /// Invoke a Bot API method with a JSON body.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: &Value) -> TelegramResult<T> {
        self.call_with_timeout(method, params, self.request_timeout)
            .await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> TelegramResult<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base, method))
            .timeout(timeout)
            .json(params)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status.as_u16(), &body)
    }

    pub async fn get_me(&self) -> TelegramResult<BotIdentity> {
        let me: User = self.call("getMe", &json!({})).await?;
        Ok(BotIdentity {
            id: UserId(me.id),
            username: me.username,
        })
    }

    /// Drop the webhook and everything queued while the bot was offline.
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> TelegramResult<bool> {
        self.call(
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> TelegramResult<Vec<Update>> {
        let params = json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });
        let timeout = Duration::from_secs(self.poll_timeout_secs) + self.request_timeout;
        self.call_with_timeout("getUpdates", &params, timeout).await
    }
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> TelegramResult<T> {
    let envelope: ApiEnvelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => return Err(TelegramError::Decode(e.to_string())),
        Err(_) => {
            return Err(TelegramError::Api {
                code: i64::from(status),
                description: truncate(body, 200),
                retry_after: None,
            })
        }
    };

    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| TelegramError::Decode("ok response without result".into()));
    }
    Err(TelegramError::Api {
        code: envelope.error_code.unwrap_or_else(|| i64::from(status)),
        description: envelope
            .description
            .unwrap_or_else(|| "no description".to_string()),
        retry_after: envelope.parameters.and_then(|p| p.retry_after),
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}
