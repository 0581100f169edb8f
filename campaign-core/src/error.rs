//! Engine error taxonomy.
//!
//! Module-level errors (`StoreError`, `NarratorError`, `ValidationError`)
//! fold into [`CampaignError`], which is what the orchestrator returns.

use crate::narrator::NarratorError;
use crate::store::StoreError;
use thiserror::Error;

/// Rejected input at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("player input is empty")]
    EmptyInput,

    #[error("player input is {len} characters, the limit is {max}")]
    InputTooLong { max: usize, len: usize },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("level {0} is outside 1-20")]
    LevelOutOfRange(u8),

    #[error("{ability} score {score} is outside 1-30")]
    AbilityOutOfRange { ability: &'static str, score: u8 },
}

/// Errors returned by the campaign engine.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("generation failed: {0}")]
    Generation(#[from] NarratorError),

    #[error("storage unavailable: {0}")]
    Transport(String),
}

impl From<StoreError> for CampaignError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CampaignError::NotFound(what),
            StoreError::Conflict(what) => CampaignError::Conflict(what),
            StoreError::Corrupt { .. } | StoreError::Backend(_) => {
                CampaignError::Transport(err.to_string())
            }
        }
    }
}

impl From<openai_chat::Error> for CampaignError {
    fn from(err: openai_chat::Error) -> Self {
        CampaignError::Generation(NarratorError::Api(err))
    }
}

impl CampaignError {
    /// Whether the caller could reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CampaignError::Conflict(_) | CampaignError::Generation(_) | CampaignError::Transport(_)
        )
    }
}
