//! Testing utilities for the campaign engine.
//!
//! This module provides tools for integration testing:
//! - `MockNarrator` for deterministic turns without API calls
//! - `TestHarness` for scripted campaign scenarios over an in-memory store
//! - Assertion helpers for verifying campaign state

use crate::character::NewCharacter;
use crate::config::EngineConfig;
use crate::error::CampaignError;
use crate::id::CampaignId;
use crate::model::{Campaign, NewCampaign, User};
use crate::narrator::{Narrator, NarratorError, NarratorOptions};
use crate::orchestrator::{CampaignOrchestrator, TurnOutcome};
use crate::prompt::Prompt;
use crate::store::MemoryStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Reply used once the script runs out.
pub const EXHAUSTED_REPLY: &str = "The DM has no more scripted responses.";

/// A scripted narrator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Fail with `NarratorError::Unavailable`.
    Fail(String),
    /// Wait, then return the text.
    Delay(Duration, String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }
}

/// A narrator that returns scripted replies in order and records every
/// prompt it receives.
#[derive(Default)]
pub struct MockNarrator {
    replies: Mutex<VecDeque<MockReply>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Add a reply to the end of the script.
    pub fn queue(&self, reply: MockReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<Prompt> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    async fn complete(
        &self,
        prompt: &Prompt,
        _options: &NarratorOptions,
    ) -> Result<String, NarratorError> {
        lock(&self.prompts).push(prompt.clone());
        let reply = lock(&self.replies).pop_front();

        match reply {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(reason)) => Err(NarratorError::Unavailable(reason)),
            Some(MockReply::Delay(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Ok(EXHAUSTED_REPLY.to_string()),
        }
    }
}

// A panicking test must not poison the script for the others.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thorin's stock character sheet under another name.
pub fn sample_character(name: &str) -> NewCharacter {
    NewCharacter::new(name, "Nain", "Guerrier").with_level(1)
}

/// Test harness for running campaign scenarios.
pub struct TestHarness {
    pub engine: CampaignOrchestrator,
    pub store: Arc<MemoryStore>,
    pub narrator: Arc<MockNarrator>,
    /// User that owns campaigns started through the harness.
    pub user: User,
}

impl TestHarness {
    /// Create a harness with default engine settings.
    pub async fn new() -> Result<Self, CampaignError> {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Result<Self, CampaignError> {
        let store = Arc::new(MemoryStore::new());
        let narrator = Arc::new(MockNarrator::new());
        let engine =
            CampaignOrchestrator::new(store.clone(), narrator.clone()).with_config(&config);
        let user = engine.ensure_user("tester").await?;

        Ok(Self {
            engine,
            store,
            narrator,
            user,
        })
    }

    /// Queue a narrator reply.
    pub fn expect_narrative(&self, text: impl Into<String>) -> &Self {
        self.narrator.queue(MockReply::Text(text.into()));
        self
    }

    /// Queue a narrator failure.
    pub fn expect_failure(&self, reason: impl Into<String>) -> &Self {
        self.narrator.queue(MockReply::Fail(reason.into()));
        self
    }

    /// Queue a reply that arrives after `delay`.
    pub fn expect_delay(&self, delay: Duration, text: impl Into<String>) -> &Self {
        self.narrator.queue(MockReply::Delay(delay, text.into()));
        self
    }

    /// Start "Curse of the Mine" with Thorin, a level 1 Nain Guerrier.
    pub async fn start_campaign(&self) -> Result<Campaign, CampaignError> {
        self.engine
            .create_campaign(
                self.user.id,
                NewCampaign::new("Curse of the Mine", sample_character("Thorin"))
                    .with_description("An abandoned dwarven mine haunted by an old curse."),
            )
            .await
    }

    /// Submit player input.
    pub async fn say(&self, id: CampaignId, text: &str) -> Result<TurnOutcome, CampaignError> {
        self.engine.submit_turn(id, text).await
    }

    /// Reload a campaign from the store.
    pub async fn reload(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        self.engine.get_campaign(id).await
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the campaign holds exactly `expected` turns.
#[track_caller]
pub fn assert_turn_count(campaign: &Campaign, expected: usize) {
    let actual = campaign.context.turn_count();
    assert_eq!(
        actual, expected,
        "Expected {expected} turns in '{}', got {actual}",
        campaign.name
    );
}

/// Assert the most recent turn has this player input and reply.
#[track_caller]
pub fn assert_last_turn(campaign: &Campaign, player: &str, dm: Option<&str>) {
    let turns = campaign.context.turns();
    let Some(last) = turns.last() else {
        panic!("Expected a last turn in '{}', found none", campaign.name);
    };
    assert_eq!(last.player, player, "Unexpected player input in last turn");
    assert_eq!(last.dm.as_deref(), dm, "Unexpected DM reply in last turn");
}

/// Assert the turn committed without a reply.
#[track_caller]
pub fn assert_degraded(outcome: &TurnOutcome) {
    assert!(
        outcome.is_degraded() && outcome.failure.is_some(),
        "Expected a degraded turn, got {outcome:?}"
    );
}
