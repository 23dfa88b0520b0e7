//! Daemon wiring and lifecycle management

use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use async_trait::async_trait;
use invitegate_core::{
    ConversationBridge, GateController, InboundEvent, MembershipLedger, RetentionSweeper,
};
use invitegate_openai::OpenAiProvider;
use invitegate_storage::memory::InMemoryGatekeeperStorage;
use invitegate_storage::postgres::PostgresGatekeeperStorage;
use invitegate_storage::GatekeeperStorage;
use invitegate_telegram::{BotApi, TelegramGateway, TelegramResult, UpdatePoller};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

const POLL_BACKOFF_START: Duration = Duration::from_secs(1);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// The running bot: one update loop, one handler task per event, and the
/// retention sweeper.
pub struct Daemon {
    config: DaemonConfig,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl+C or SIGTERM, then drain in-flight handlers.
    pub async fn run(self) -> DaemonResult<()> {
        let mut shutdown = ShutdownSignal::install()?;
        let store = open_storage(&self.config.storage).await?;

        let api = BotApi::new(&self.config.telegram)?;
        let identity = api.get_me().await?;
        api.delete_webhook(true).await?;
        tracing::info!(
            bot_id = %identity.id,
            username = identity.username.as_deref().unwrap_or("-"),
            "Bot webhook cleared and ready for polling"
        );

        let gateway = Arc::new(TelegramGateway::new(api.clone()));
        let provider = Arc::new(
            OpenAiProvider::new(self.config.openai.clone())
                .map_err(|e| DaemonError::Config(format!("failed to build OpenAI client: {e}")))?,
        );
        let ledger = MembershipLedger::new(store.clone(), self.config.gate);
        let bridge = ConversationBridge::new(
            store.clone(),
            provider,
            gateway.clone(),
            &self.config.conversation,
            &self.config.delivery,
        );
        let controller = GateController::new(ledger, gateway, bridge, identity.id);

        let sweeper = RetentionSweeper::new(store, &self.config.conversation);
        let sweeper_task = tokio::spawn(sweeper.clone().start());

        let mut poller = UpdatePoller::new(api, identity.username);
        let mut handlers = JoinSet::new();
        let handle = move |event: InboundEvent| {
            let controller = controller.clone();
            async move { controller.dispatch(event).await }
        };
        tracing::info!("Starting bot polling");
        serve(&mut poller, handle, &mut handlers, shutdown.recv()).await;

        tracing::info!(in_flight = handlers.len(), "Shutting down, draining handlers");
        sweeper.stop().await;
        while let Some(result) = handlers.join_next().await {
            log_handler_exit(result);
        }
        if let Err(e) = sweeper_task.await {
            tracing::error!(error = %e, "Retention sweeper task failed");
        }
        tracing::info!("invitegated stopped");
        Ok(())
    }
}

async fn open_storage(config: &StorageConfig) -> DaemonResult<Arc<dyn GatekeeperStorage>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok(Arc::new(InMemoryGatekeeperStorage::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = PostgresGatekeeperStorage::connect_with_options(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            tracing::info!(max_connections, "Database initialized successfully");
            Ok(Arc::new(store))
        }
    }
}

/// Source of inbound event batches.
#[async_trait]
trait EventSource {
    async fn next_events(&mut self) -> TelegramResult<Vec<InboundEvent>>;
}

#[async_trait]
impl EventSource for UpdatePoller {
    async fn next_events(&mut self) -> TelegramResult<Vec<InboundEvent>> {
        UpdatePoller::next_events(self).await
    }
}

/// Poll events and spawn one handler per event until `shutdown` resolves.
///
/// A poll is only ever abandoned for shutdown; finished handlers are reaped
/// between polls.
async fn serve<S, H, Fut>(
    source: &mut S,
    handle: H,
    handlers: &mut JoinSet<()>,
    shutdown: impl Future<Output = ()>,
) where
    S: EventSource + Send,
    H: Fn(InboundEvent) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::pin!(shutdown);
    let mut backoff = POLL_BACKOFF_START;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            batch = source.next_events() => match batch {
                Ok(events) => {
                    backoff = POLL_BACKOFF_START;
                    for event in events {
                        handlers.spawn(handle(event));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, retry_in_secs = backoff.as_secs(), "Polling failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(POLL_BACKOFF_MAX);
                }
            },
        }
        while let Some(result) = handlers.try_join_next() {
            log_handler_exit(result);
        }
    }
}

fn log_handler_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "Event handler panicked");
        }
    }
}

/// Ctrl+C or SIGTERM. Installed before startup work so a failure to
/// register is a startup error.
struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    fn install() -> DaemonResult<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            self.terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received terminate signal, initiating graceful shutdown");
            }
        }
    }
}
