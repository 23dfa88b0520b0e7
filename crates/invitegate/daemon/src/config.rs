//! Configuration for invitegated

use crate::error::{DaemonError, DaemonResult};
use invitegate_core::{ConversationConfig, DeliveryConfig, GateConfig};
use invitegate_openai::OpenAiConfig;
use invitegate_telegram::TelegramConfig;
use serde::{Deserialize, Serialize};

/// Environment prefix; nested keys use `__`, e.g.
/// `INVITEGATE_TELEGRAM__BOT_TOKEN`.
pub const ENV_PREFIX: &str = "INVITEGATE";

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Invite quota bounds
    #[serde(default)]
    pub gate: GateConfig,

    /// Assistant history and retention
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Outbound retry policy
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage; state is lost on restart
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

impl StorageConfig {
    pub fn postgres(url: impl Into<String>) -> Self {
        StorageConfig::Postgres {
            url: url.into(),
            max_connections: default_pool_size(),
            connect_timeout_secs: default_connection_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, or any `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then the
    /// environment.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Add environment variables with INVITEGATE_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the daemon cannot start with. Returns the
    /// warnings for degraded but runnable setups.
    pub fn validate(&self) -> DaemonResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.telegram.bot_token.trim().is_empty() {
            return Err(DaemonError::Config(
                "telegram.bot_token is required (or set TELEGRAM_BOT_TOKEN)".into(),
            ));
        }

        let gate = &self.gate;
        if gate.min_required_users == 0 || gate.min_required_users > gate.max_required_users {
            return Err(DaemonError::Config(format!(
                "invalid gate bounds {}..={}",
                gate.min_required_users, gate.max_required_users
            )));
        }
        if !gate.contains(i64::from(gate.default_required_users)) {
            return Err(DaemonError::Config(format!(
                "gate.default_required_users {} is outside {}..={}",
                gate.default_required_users, gate.min_required_users, gate.max_required_users
            )));
        }

        if let StorageConfig::Postgres { url, .. } = &self.storage {
            if url.trim().is_empty() {
                return Err(DaemonError::Config("storage.url is empty".into()));
            }
        } else {
            warnings.push("in-memory storage: group state is lost on restart".to_string());
        }

        if !self.openai.has_api_key() {
            warnings.push(
                "openai.api_key is not set: assistant replies are disabled".to_string(),
            );
        }
        if self.conversation.provider_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "conversation.provider_timeout_secs must be positive".into(),
            ));
        }

        Ok(warnings)
    }
}
