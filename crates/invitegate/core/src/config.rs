//! Tunables for the gatekeeper core.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invite quota bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_min_required")]
    pub min_required_users: u32,

    #[serde(default = "default_max_required")]
    pub max_required_users: u32,

    /// Quota for groups without explicit settings
    #[serde(default = "default_required")]
    pub default_required_users: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_required_users: default_min_required(),
            max_required_users: default_max_required(),
            default_required_users: default_required(),
        }
    }
}

impl GateConfig {
    pub fn contains(&self, value: i64) -> bool {
        (i64::from(self.min_required_users)..=i64::from(self.max_required_users)).contains(&value)
    }
}

/// Assistant conversation settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns loaded as context per request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Deadline for a single provider call
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Turns older than this are swept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            provider_timeout_secs: default_provider_timeout(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ConversationConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Reply delivery retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Attempts for the final service-unavailable notice
    #[serde(default = "default_notice_attempts")]
    pub notice_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub notice_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            notice_attempts: default_notice_attempts(),
            notice_delay_ms: default_base_delay_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn reply_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn notice_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.notice_attempts,
            Duration::from_millis(self.notice_delay_ms),
        )
    }
}

fn default_min_required() -> u32 {
    1
}

fn default_max_required() -> u32 {
    20
}

fn default_required() -> u32 {
    5
}

fn default_history_limit() -> usize {
    10
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    7
}

fn default_sweep_interval() -> u64 {
    24 * 60 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_notice_attempts() -> u32 {
    2
}
