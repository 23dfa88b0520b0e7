//! Completion provider capability.

use crate::error::ProviderFailure;
use async_trait::async_trait;
use invitegate_storage::TurnRole;
use serde::{Deserialize, Serialize};

/// One prior turn handed to the provider as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: TurnRole,
    pub text: String,
}

/// Which configured model a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    #[default]
    Primary,
    /// Single-turn fallback after the primary call failed.
    Fallback,
}

/// Prompt plus ordered (oldest first) history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub history: Vec<HistoryEntry>,
    pub tier: ModelTier,
}

impl CompletionRequest {
    pub fn with_history(prompt: impl Into<String>, history: Vec<HistoryEntry>) -> Self {
        Self {
            prompt: prompt.into(),
            history,
            tier: ModelTier::Primary,
        }
    }

    pub fn fallback(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            history: Vec::new(),
            tier: ModelTier::Fallback,
        }
    }
}

/// Generative text backend.
///
/// Implementations need not enforce a deadline; the conversation bridge
/// wraps every call in its own timeout.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Whether credentials are present. An unconfigured provider is never
    /// called.
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure>;
}
