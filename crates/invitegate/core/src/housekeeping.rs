//! Conversation retention sweep.

use crate::config::ConversationConfig;
use crate::error::GateResult;
use chrono::{Duration as ChronoDuration, Utc};
use invitegate_storage::GatekeeperStorage;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval_at, Duration, Instant};

/// Periodically drops conversation turns older than the retention window.
/// Runs on its own task; event handling never waits on it.
pub struct RetentionSweeper {
    store: Arc<dyn GatekeeperStorage>,
    retention: ChronoDuration,
    period: Duration,
    running: RwLock<bool>,
    stop: Notify,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn GatekeeperStorage>, config: &ConversationConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            retention: ChronoDuration::days(i64::from(config.retention_days)),
            period: config.sweep_interval(),
            running: RwLock::new(false),
            stop: Notify::new(),
        })
    }

    /// Delete expired turns once. Returns how many were removed.
    pub async fn sweep_once(&self) -> GateResult<u64> {
        let cutoff = Utc::now() - self.retention;
        let purged = self.store.purge_turns_before(cutoff).await?;
        tracing::info!(purged, cutoff = %cutoff, "Old conversation history cleaned up");
        Ok(purged)
    }

    /// Sweep every period until [`stop`](Self::stop) is called. The first
    /// sweep happens one period after start.
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        tracing::info!(period_secs = self.period.as_secs(), "Retention sweeper started");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Conversation cleanup failed");
                    }
                }
                _ = self.stop.notified() => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        tracing::info!("Retention sweeper stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        self.stop.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invitegate_storage::memory::InMemoryGatekeeperStorage;
    use invitegate_storage::{ConversationAppend, ConversationStore, GroupId, TurnRole, UserId};

    async fn seed(store: &InMemoryGatekeeperStorage, age: ChronoDuration) {
        store
            .append_turn(ConversationAppend {
                user_id: UserId(1),
                group_id: GroupId(-1),
                message_text: "hi".into(),
                response_text: None,
                role: TurnRole::User,
                created_at: Utc::now() - age,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_respects_retention_window() {
        let store = Arc::new(InMemoryGatekeeperStorage::new());
        seed(&store, ChronoDuration::days(8)).await;
        seed(&store, ChronoDuration::days(1)).await;

        let sweeper = RetentionSweeper::new(store.clone(), &ConversationConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_on_schedule_and_stops() {
        let store = Arc::new(InMemoryGatekeeperStorage::new());
        seed(&store, ChronoDuration::days(30)).await;
        let config = ConversationConfig {
            sweep_interval_secs: 60,
            ..ConversationConfig::default()
        };
        let sweeper = RetentionSweeper::new(store.clone(), &config);
        let handle = tokio::spawn(sweeper.clone().start());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let left = store
            .recent_turns(UserId(1), GroupId(-1), 10)
            .await
            .unwrap();
        assert!(left.is_empty());

        sweeper.stop().await;
        handle.await.unwrap();
    }
}
