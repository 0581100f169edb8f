//! Campaign session-state engine with an AI game master.
//!
//! This crate provides:
//! - Users and campaigns (a character plus an append-only narrative log)
//! - A deterministic prompt builder for the game-master model
//! - A narrator abstraction over a chat-completions backend
//! - SQLite and in-memory persistence with optimistic revisions
//! - The orchestrator that commits one player turn at a time
//!
//! # Quick Start
//!
//! ```ignore
//! use campaign_core::{
//!     CampaignOrchestrator, ChatNarrator, EngineConfig, NewCampaign, NewCharacter, SqliteStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!     let store = SqliteStore::connect(&config.database_url).await?;
//!     let narrator = ChatNarrator::from_config(&config)?;
//!     let engine = CampaignOrchestrator::new(Arc::new(store), Arc::new(narrator))
//!         .with_config(&config);
//!
//!     let user = engine.ensure_user("player").await?;
//!     let campaign = engine
//!         .create_campaign(
//!             user.id,
//!             NewCampaign::new("Curse of the Mine", NewCharacter::new("Thorin", "Nain", "Guerrier")),
//!         )
//!         .await?;
//!
//!     let outcome = engine.submit_turn(campaign.id, "I search the chest").await?;
//!     if let Some(dm) = outcome.dm {
//!         println!("{}", dm.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod character;
pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod model;
pub mod narrator;
pub mod orchestrator;
pub mod prompt;
pub mod store;
pub mod testing;

// Primary public API
pub use character::{AbilityScores, Character, NewCharacter};
pub use config::{ConfigError, EngineConfig};
pub use context::{ContextMessage, Role, SessionContext, Turn};
pub use error::{CampaignError, ValidationError};
pub use id::{CampaignId, UserId};
pub use model::{Campaign, CampaignSummary, NewCampaign, User};
pub use narrator::{ChatNarrator, Narrator, NarratorError, NarratorOptions, OfflineNarrator};
pub use orchestrator::{CampaignOrchestrator, TurnOutcome};
pub use prompt::{Prompt, PromptBuilder};
pub use store::{CampaignStore, MemoryStore, SqliteStore, StoreError};
pub use testing::{MockNarrator, MockReply, TestHarness};
