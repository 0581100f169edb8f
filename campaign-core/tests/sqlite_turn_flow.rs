//! Turns played through the engine against the SQLite store.

use campaign_core::testing::{
    assert_degraded, assert_last_turn, assert_turn_count, sample_character, MockNarrator, MockReply,
};
use campaign_core::{
    Campaign, CampaignOrchestrator, ContextMessage, NewCampaign, Role, SqliteStore,
};
use std::sync::Arc;

struct SqliteHarness {
    engine: CampaignOrchestrator,
    narrator: Arc<MockNarrator>,
}

impl SqliteHarness {
    async fn new() -> Self {
        let store = SqliteStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        let narrator = Arc::new(MockNarrator::new());
        let engine = CampaignOrchestrator::new(Arc::new(store), narrator.clone());
        Self { engine, narrator }
    }

    async fn start_campaign(&self) -> Campaign {
        let user = self.engine.ensure_user("tester").await.unwrap();
        self.engine
            .create_campaign(
                user.id,
                NewCampaign::new("Curse of the Mine", sample_character("Thorin")),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_first_turn_is_persisted() {
    let harness = SqliteHarness::new().await;
    let campaign = harness.start_campaign().await;

    harness
        .narrator
        .queue(MockReply::text("The lid groans open. Inside, a lantern."));
    let outcome = harness
        .engine
        .submit_turn(campaign.id, "I search the chest")
        .await
        .unwrap();
    assert_eq!(outcome.revision, 1);
    assert!(outcome.failure.is_none());

    let reloaded = harness.engine.get_campaign(campaign.id).await.unwrap();
    let history: Vec<_> = reloaded.context.history().collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], &ContextMessage::user("I search the chest"));
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "The lid groans open. Inside, a lantern.");
    assert_eq!(reloaded.revision, 1);

    let listed = harness
        .engine
        .list_campaigns_for_user(campaign.owner_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].turn_count, 1);
}

#[tokio::test]
async fn test_failed_turn_keeps_player_input() {
    let harness = SqliteHarness::new().await;
    let campaign = harness.start_campaign().await;

    harness.narrator.queue(MockReply::text("Torchlight flickers."));
    harness.narrator.queue(MockReply::Fail("overloaded".into()));
    harness.narrator.queue(MockReply::text("The tunnel slopes down."));

    harness.engine.submit_turn(campaign.id, "I light a torch").await.unwrap();
    let outcome = harness.engine.submit_turn(campaign.id, "I wait").await.unwrap();
    assert_degraded(&outcome);
    assert_eq!(outcome.revision, 2);

    let reloaded = harness.engine.get_campaign(campaign.id).await.unwrap();
    assert_turn_count(&reloaded, 2);
    assert_last_turn(&reloaded, "I wait", None);

    harness.engine.submit_turn(campaign.id, "I walk deeper").await.unwrap();
    let reloaded = harness.engine.get_campaign(campaign.id).await.unwrap();
    assert_turn_count(&reloaded, 3);
    assert_last_turn(&reloaded, "I walk deeper", Some("The tunnel slopes down."));
    assert_eq!(reloaded.revision, 3);

    let prompts = harness.narrator.prompts();
    assert_eq!(
        prompts[2].messages,
        vec![
            ContextMessage::user("I light a torch"),
            ContextMessage::assistant("Torchlight flickers."),
            ContextMessage::user("I wait"),
            ContextMessage::user("I walk deeper"),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_turns_are_serialized() {
    let harness = Arc::new(SqliteHarness::new().await);
    let campaign = harness.start_campaign().await;
    for i in 0..8 {
        harness.narrator.queue(MockReply::text(format!("Reply {i}")));
    }

    let mut tasks = Vec::new();
    for i in 0..8 {
        let harness = harness.clone();
        tasks.push(tokio::spawn(async move {
            harness
                .engine
                .submit_turn(campaign.id, &format!("Action {i}"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let reloaded = harness.engine.get_campaign(campaign.id).await.unwrap();
    assert_turn_count(&reloaded, 8);
    assert_eq!(reloaded.revision, 8);
}
