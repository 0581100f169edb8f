//! CampaignOrchestrator - the primary public API of the engine.
//!
//! The orchestrator owns the rules for how a campaign's context grows: one
//! turn at a time per campaign, prompt built from the state before the
//! turn, narrator call under a timeout, and a single revision-checked write
//! at the end.

use crate::character::Character;
use crate::config::{EngineConfig, DEFAULT_DISPLAY_TURNS, DEFAULT_MAX_INPUT_CHARS};
use crate::context::{ContextMessage, SessionContext, Turn};
use crate::error::{CampaignError, ValidationError};
use crate::id::{CampaignId, UserId};
use crate::model::{Campaign, CampaignSummary, NewCampaign, User};
use crate::narrator::{Narrator, NarratorError, NarratorOptions};
use crate::prompt::{campaign_preamble, Prompt, PromptBuilder};
use crate::store::{CampaignStore, NewCampaignRecord, NewUser, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, trace, warn};

type TurnLocks = StdMutex<HashMap<CampaignId, Arc<Mutex<()>>>>;

/// Result of one submitted turn.
///
/// A turn whose narrator call failed is still a success for the caller:
/// the player's message is stored, `dm` is `None` and `failure` says why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub player: ContextMessage,
    pub dm: Option<ContextMessage>,
    pub failure: Option<String>,
    /// Campaign revision after the turn was written.
    pub revision: u64,
}

impl TurnOutcome {
    pub fn is_degraded(&self) -> bool {
        self.dm.is_none()
    }
}

/// Sequences load, prompt, generate and commit for campaign turns.
pub struct CampaignOrchestrator {
    store: Arc<dyn CampaignStore>,
    narrator: Arc<dyn Narrator>,
    prompts: PromptBuilder,
    options: NarratorOptions,
    display_turns: usize,
    max_input_chars: usize,
    /// Only campaigns with a turn in flight have an entry.
    turn_locks: TurnLocks,
    admin_username: Option<String>,
    admin_password: Option<String>,
}

impl CampaignOrchestrator {
    pub fn new(store: Arc<dyn CampaignStore>, narrator: Arc<dyn Narrator>) -> Self {
        Self {
            store,
            narrator,
            prompts: PromptBuilder::new(),
            options: NarratorOptions::default(),
            display_turns: DEFAULT_DISPLAY_TURNS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            turn_locks: StdMutex::new(HashMap::new()),
            admin_username: None,
            admin_password: None,
        }
    }

    /// Apply narrator options, limits and instructions from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.options = config.narrator.clone();
        self.display_turns = config.display_turns;
        self.max_input_chars = config.max_input_chars;
        self.admin_username = config.admin_username.clone();
        self.admin_password = config.admin_password.clone();
        self.prompts = match config.instructions {
            Some(ref extra) => PromptBuilder::new().with_instructions(extra.as_str()),
            None => PromptBuilder::new(),
        };
        self
    }

    pub fn with_options(mut self, options: NarratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub fn options(&self) -> &NarratorOptions {
        &self.options
    }

    pub fn display_turns(&self) -> usize {
        self.display_turns
    }

    pub fn store(&self) -> &Arc<dyn CampaignStore> {
        &self.store
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Register a new user. The password hash is stored as given.
    pub async fn register_user(
        &self,
        username: &str,
        password_hash: Option<String>,
    ) -> Result<User, CampaignError> {
        let username = required_text(username, "username")?;
        let mut new_user = NewUser::new(username);
        new_user.password_hash = password_hash;

        let user = self.store.create_user(new_user).await?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Return the user called `username`, creating it if needed.
    ///
    /// A user created under the configured admin username is an
    /// administrator and gets the configured admin password. Existing users
    /// are returned unchanged.
    pub async fn ensure_user(&self, username: &str) -> Result<User, CampaignError> {
        let username = required_text(username, "username")?;
        if let Some(user) = self.store.find_user_by_username(&username).await? {
            return Ok(user);
        }

        let is_admin = self.admin_username.as_deref() == Some(username.as_str());
        let mut new_user = NewUser::new(username.as_str()).with_admin(is_admin);
        if is_admin {
            new_user.password_hash = self.admin_password.clone();
        }

        match self.store.create_user(new_user).await {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    username = %user.username,
                    is_admin = user.is_admin,
                    "user created"
                );
                Ok(user)
            }
            // lost a race with another creator
            Err(StoreError::Conflict(_)) => self
                .store
                .find_user_by_username(&username)
                .await?
                .ok_or_else(|| CampaignError::NotFound(format!("user {username:?}"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up `username` and compare `password_hash` with the stored value.
    ///
    /// The comparison is an exact string match; hashing is the caller's job.
    /// Unknown users, users without a stored hash and mismatches all give
    /// `None`.
    pub async fn authenticate(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<User>, CampaignError> {
        let Some(user) = self.store.find_user_by_username(username.trim()).await? else {
            debug!(username, "authentication failed: unknown user");
            return Ok(None);
        };
        if user.password_hash.as_deref() != Some(password_hash) {
            debug!(user_id = %user.id, "authentication failed: password mismatch");
            return Ok(None);
        }
        Ok(Some(user))
    }

    // ========================================================================
    // Campaigns
    // ========================================================================

    /// Start a campaign for `owner` with a validated character and a fresh
    /// context holding the campaign preamble.
    pub async fn create_campaign(
        &self,
        owner: UserId,
        request: NewCampaign,
    ) -> Result<Campaign, CampaignError> {
        let name = required_text(&request.name, "campaign name")?;
        let character: Character = request.character.build()?;
        let description = request.description.trim().to_string();

        let preamble = campaign_preamble(&name, &description, &character);
        let record = NewCampaignRecord {
            owner_id: owner,
            name,
            description,
            character,
            context: SessionContext::with_preamble(preamble),
        };

        let campaign = self.store.create_campaign(record).await?;
        info!(
            campaign_id = %campaign.id,
            owner = %owner,
            name = %campaign.name,
            character = %campaign.character.name,
            "campaign created"
        );
        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: CampaignId) -> Result<Campaign, CampaignError> {
        Ok(self.store.load_campaign(id).await?)
    }

    /// The user's campaigns, most recently played first.
    pub async fn list_campaigns_for_user(
        &self,
        owner: UserId,
    ) -> Result<Vec<CampaignSummary>, CampaignError> {
        self.store.find_user(owner).await?;
        Ok(self.store.list_campaigns_for_user(owner).await?)
    }

    /// The last `n` turns of a campaign, or the configured display window
    /// when `n` is `None`.
    pub async fn recent_turns(
        &self,
        id: CampaignId,
        n: Option<usize>,
    ) -> Result<Vec<Turn>, CampaignError> {
        let campaign = self.store.load_campaign(id).await?;
        Ok(campaign.context.tail(n.unwrap_or(self.display_turns)))
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Play one turn.
    ///
    /// Turns for the same campaign are serialized. If the narrator fails or
    /// times out the player's message is still committed and the outcome is
    /// degraded; validation and lookup errors commit nothing.
    pub async fn submit_turn(
        &self,
        id: CampaignId,
        input: &str,
    ) -> Result<TurnOutcome, CampaignError> {
        let _turn = self.lock_campaign(id).await;
        self.play_turn(id, input).await
    }

    async fn play_turn(&self, id: CampaignId, input: &str) -> Result<TurnOutcome, CampaignError> {
        let campaign = self.store.load_campaign(id).await?;
        let input = self.validate_input(input)?;

        let prompt = self.prompts.build(&campaign.context, &input);
        debug!(
            campaign_id = %id,
            revision = campaign.revision,
            prompt_messages = prompt.messages.len(),
            "prompt built"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(campaign_id = %id, prompt = %prompt.to_text(), "prompt text");
        }

        let started = Instant::now();
        let reply = self.generate(&prompt).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut context = campaign.context;
        match reply {
            Ok(text) => {
                context.push_turn(Turn::new(input.as_str(), text.as_str()));
                let revision = self.store.save_context(id, &context, campaign.revision).await?;
                info!(
                    campaign_id = %id,
                    revision,
                    turns = context.turn_count(),
                    elapsed_ms,
                    "turn committed"
                );
                Ok(TurnOutcome {
                    player: ContextMessage::user(input),
                    dm: Some(ContextMessage::assistant(text)),
                    failure: None,
                    revision,
                })
            }
            Err(err) => {
                warn!(campaign_id = %id, error = %err, elapsed_ms, "narrator failed, keeping player input");
                context.push_turn(Turn::unanswered(input.as_str()));
                let revision = self.store.save_context(id, &context, campaign.revision).await?;
                Ok(TurnOutcome {
                    player: ContextMessage::user(input),
                    dm: None,
                    failure: Some(err.to_string()),
                    revision,
                })
            }
        }
    }

    /// Ask the narrator for a reply to an already built prompt.
    pub async fn generate(&self, prompt: &Prompt) -> Result<String, NarratorError> {
        let call = self.narrator.complete(prompt, &self.options);
        match tokio::time::timeout(self.options.timeout, call).await {
            Err(_) => Err(NarratorError::Timeout(self.options.timeout)),
            Ok(Ok(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    Err(NarratorError::EmptyReply)
                } else {
                    Ok(text.to_string())
                }
            }
            Ok(Err(e)) => Err(e),
        }
    }

    fn validate_input(&self, input: &str) -> Result<String, ValidationError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        let len = input.chars().count();
        if len > self.max_input_chars {
            return Err(ValidationError::InputTooLong {
                max: self.max_input_chars,
                len,
            });
        }
        Ok(input.to_string())
    }

    async fn lock_campaign(&self, id: CampaignId) -> TurnLock<'_> {
        let lock = {
            let mut locks = lock_map(&self.turn_locks);
            // entries left behind by cancelled turns
            locks.retain(|other, l| *other == id || Arc::strong_count(l) > 1);
            locks.entry(id).or_default().clone()
        };
        let mut turn = TurnLock {
            locks: &self.turn_locks,
            id,
            lock: Some(lock.clone()),
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    #[cfg(test)]
    fn tracked_turn_locks(&self) -> usize {
        lock_map(&self.turn_locks).len()
    }
}

/// Held for the duration of one turn. Removes the campaign's map entry on
/// release when no other turn is waiting for it.
struct TurnLock<'a> {
    locks: &'a TurnLocks,
    id: CampaignId,
    lock: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.lock.take();
        let mut locks = lock_map(self.locks);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

fn lock_map(locks: &TurnLocks) -> MutexGuard<'_, HashMap<CampaignId, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn required_text(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_character, MockNarrator, MockReply};
    use crate::MemoryStore;
    use std::time::Duration;

    fn orchestrator(narrator: MockNarrator) -> CampaignOrchestrator {
        CampaignOrchestrator::new(Arc::new(MemoryStore::new()), Arc::new(narrator))
    }

    #[test]
    fn test_validate_input() {
        let engine = orchestrator(MockNarrator::new()).with_max_input_chars(5);

        assert_eq!(engine.validate_input("  look \n").unwrap(), "look");
        assert_eq!(engine.validate_input(" \t "), Err(ValidationError::EmptyInput));
        assert_eq!(
            engine.validate_input("abcdef"),
            Err(ValidationError::InputTooLong { max: 5, len: 6 })
        );
        // characters, not bytes
        assert!(engine.validate_input("éééé").is_ok());
    }

    #[test]
    fn test_with_config() {
        let config = EngineConfig::default()
            .with_display_turns(4)
            .with_max_input_chars(50)
            .with_instructions("Be terse.");
        let engine = orchestrator(MockNarrator::new()).with_config(&config);

        assert_eq!(engine.display_turns(), 4);
        assert_eq!(engine.max_input_chars, 50);
        let prompt = engine.prompts.build(&SessionContext::empty(), "hi");
        assert!(prompt.system.contains("Be terse."));
    }

    #[tokio::test]
    async fn test_generate_rejects_blank_reply() {
        let engine = orchestrator(MockNarrator::with_replies(vec![MockReply::Text("  \n".into())]));
        let prompt = PromptBuilder::new().build(&SessionContext::empty(), "hello");

        assert!(matches!(engine.generate(&prompt).await, Err(NarratorError::EmptyReply)));
    }

    #[tokio::test]
    async fn test_ensure_user_is_idempotent() {
        let engine = orchestrator(MockNarrator::new());

        let first = engine.ensure_user("player").await.unwrap();
        let second = engine.ensure_user(" player ").await.unwrap();
        assert_eq!(first.id, second.id);

        assert!(matches!(
            engine.ensure_user("  ").await,
            Err(CampaignError::Validation(ValidationError::MissingField("username")))
        ));
    }

    #[tokio::test]
    async fn test_register_duplicate_username() {
        let engine = orchestrator(MockNarrator::new());
        engine
            .register_user("aria", Some("$argon2id$hash".into()))
            .await
            .unwrap();

        let err = engine.register_user("aria", None).await.unwrap_err();
        assert!(matches!(err, CampaignError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ensure_user_creates_configured_admin() {
        let config = EngineConfig::default().with_admin("gm", Some("s3cret".into()));
        let engine = orchestrator(MockNarrator::new()).with_config(&config);

        let admin = engine.ensure_user("gm").await.unwrap();
        assert!(admin.is_admin);
        assert_eq!(admin.password_hash.as_deref(), Some("s3cret"));

        let player = engine.ensure_user("player").await.unwrap();
        assert!(!player.is_admin);
        assert!(player.password_hash.is_none());
    }

    #[tokio::test]
    async fn test_authenticate() {
        let engine = orchestrator(MockNarrator::new());
        let aria = engine
            .register_user("aria", Some("$argon2id$hash".into()))
            .await
            .unwrap();
        engine.register_user("bob", None).await.unwrap();

        let found = engine.authenticate("aria", "$argon2id$hash").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(aria.id));

        assert!(engine.authenticate("aria", "$argon2id$other").await.unwrap().is_none());
        assert!(engine.authenticate("aria", "$ARGON2ID$HASH").await.unwrap().is_none());
        assert!(engine.authenticate("bob", "").await.unwrap().is_none());
        assert!(engine.authenticate("nobody", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_turn_locks_are_released() {
        let engine = orchestrator(MockNarrator::with_replies(vec![
            MockReply::Text("The chest is empty.".into()),
            MockReply::Text("A rat scurries away.".into()),
        ]));

        for _ in 0..100 {
            let err = engine.submit_turn(CampaignId::new(), "look").await.unwrap_err();
            assert!(matches!(err, CampaignError::NotFound(_)));
        }
        assert_eq!(engine.tracked_turn_locks(), 0);

        let user = engine.ensure_user("player").await.unwrap();
        let campaign = engine
            .create_campaign(
                user.id,
                NewCampaign::new("Curse of the Mine", sample_character("Thorin")),
            )
            .await
            .unwrap();
        engine.submit_turn(campaign.id, "I search the chest").await.unwrap();
        engine.submit_turn(campaign.id, "I listen").await.unwrap();
        assert_eq!(engine.tracked_turn_locks(), 0);
    }

    #[tokio::test]
    async fn test_turn_lock_outlives_waiting_turns() {
        let engine = orchestrator(MockNarrator::new());
        let id = CampaignId::new();

        let first = engine.lock_campaign(id).await;
        let second = engine.lock_campaign(id);
        tokio::pin!(second);
        // still held by `first`
        let waited = tokio::time::timeout(Duration::from_millis(20), second.as_mut()).await;
        assert!(waited.is_err());
        assert_eq!(engine.tracked_turn_locks(), 1);

        drop(first);
        assert_eq!(engine.tracked_turn_locks(), 1);
        let second = second.await;
        drop(second);
        assert_eq!(engine.tracked_turn_locks(), 0);
    }
}
