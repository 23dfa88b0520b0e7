//! invitegated - invite-quota gatekeeper bot
//!
//! Keeps new group members muted until they have added enough other
//! members, and answers unrestricted members through the assistant.

use clap::Parser;
use invitegate_daemon::{Daemon, DaemonConfig, DaemonResult, LoggingConfig, StorageConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// invitegate daemon CLI
#[derive(Parser)]
#[command(name = "invitegated")]
#[command(about = "Invite-quota gatekeeper bot for group chats", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "INVITEGATE_CONFIG")]
    config: Option<String>,

    /// Log level, overrides logging.level
    #[arg(long, env = "INVITEGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "INVITEGATE_LOG_JSON")]
    json: bool,

    /// PostgreSQL URL; selects the postgres storage backend
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Telegram bot token, overrides telegram.bot_token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// OpenAI API key, overrides openai.api_key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.json = true;
        }
        if let Some(url) = self.database_url {
            config.storage = StorageConfig::postgres(url);
        }
        if let Some(token) = self.bot_token {
            config.telegram.bot_token = token;
        }
        if let Some(key) = self.openai_api_key {
            config.openai.api_key = Some(key);
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration, then let the CLI override it
    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    init_tracing(&config.logging);

    let warnings = config.validate()?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        default_required_users = config.gate.default_required_users,
        "Configuration validated successfully"
    );

    Daemon::new(config).run().await
}
