//! Turn-by-turn behaviour of the campaign engine.
//!
//! These tests run against the in-memory store and a scripted narrator.

use campaign_core::testing::{assert_degraded, assert_last_turn, assert_turn_count, sample_character};
use campaign_core::{
    CampaignError, CampaignId, ContextMessage, EngineConfig, NarratorOptions, NewCampaign,
    NewCharacter, Role, TestHarness, ValidationError,
};
use std::time::Duration;

// =============================================================================
// Scenario
// =============================================================================

#[tokio::test]
async fn test_curse_of_the_mine_first_turn() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    assert_eq!(campaign.name, "Curse of the Mine");
    assert_eq!(campaign.character.name, "Thorin");
    assert_eq!(campaign.character.race, "Nain");
    assert_eq!(campaign.character.class_name, "Guerrier");
    assert_eq!(campaign.character.level, 1);
    assert_eq!(campaign.revision, 0);
    assert_turn_count(&campaign, 0);

    let preamble: Vec<_> = campaign.context.preamble().collect();
    assert_eq!(preamble.len(), 1);
    assert!(preamble[0].content.contains("Curse of the Mine"));
    assert!(preamble[0].content.contains("Thorin"));

    harness.expect_narrative("The lid groans open. Inside, a lantern and a map of the lower shafts.");
    let outcome = harness.say(campaign.id, "I search the chest").await.unwrap();

    assert_eq!(outcome.player, ContextMessage::user("I search the chest"));
    assert!(outcome.failure.is_none());
    assert_eq!(outcome.revision, 1);

    let reloaded = harness.reload(campaign.id).await.unwrap();
    let history: Vec<_> = reloaded.context.history().collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "I search the chest");
    assert_eq!(history[1].role, Role::Assistant);
    assert!(!history[1].content.is_empty());
    assert_eq!(reloaded.revision, 1);
}

#[tokio::test]
async fn test_prompt_is_built_from_prior_state() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    harness
        .expect_narrative("Torchlight flickers.")
        .expect_narrative("The tunnel slopes down.");
    harness.say(campaign.id, "I light a torch").await.unwrap();
    harness.say(campaign.id, "I walk deeper").await.unwrap();

    let prompts = harness.narrator.prompts();
    assert_eq!(prompts.len(), 2);

    assert_eq!(prompts[0].messages, vec![ContextMessage::user("I light a torch")]);
    assert_eq!(
        prompts[1].messages,
        vec![
            ContextMessage::user("I light a torch"),
            ContextMessage::assistant("Torchlight flickers."),
            ContextMessage::user("I walk deeper"),
        ]
    );
    assert!(prompts[1].system.contains("**Name:** Thorin"));
}

// =============================================================================
// Append-only log
// =============================================================================

#[tokio::test]
async fn test_turns_only_ever_append() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    let mut snapshots = Vec::new();
    for i in 1..=5 {
        harness.expect_narrative(format!("outcome {i}"));
        harness.say(campaign.id, &format!("action {i}")).await.unwrap();
        snapshots.push(harness.reload(campaign.id).await.unwrap());
    }

    for (i, snapshot) in snapshots.iter().enumerate() {
        assert_turn_count(snapshot, i + 1);
        assert_eq!(snapshot.revision, (i + 1) as u64);
        if i > 0 {
            let previous = snapshots[i - 1].context.messages();
            assert_eq!(&snapshot.context.messages()[..previous.len()], previous);
        }
    }
    assert_last_turn(&snapshots[4], "action 5", Some("outcome 5"));
}

#[tokio::test]
async fn test_input_is_stored_trimmed() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();
    harness.expect_narrative("  You hear dripping water.\n");

    let outcome = harness.say(campaign.id, "   I listen \n").await.unwrap();
    assert_eq!(outcome.player.content, "I listen");
    assert_eq!(outcome.dm.unwrap().content, "You hear dripping water.");
}

// =============================================================================
// Narrator failures
// =============================================================================

#[tokio::test]
async fn test_failure_keeps_only_player_message() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();
    let before = campaign.context.message_count();

    harness.expect_failure("upstream returned 503");
    let outcome = harness.say(campaign.id, "I pry at the door").await.unwrap();

    assert_degraded(&outcome);
    assert!(outcome.failure.as_deref().unwrap().contains("503"));

    let reloaded = harness.reload(campaign.id).await.unwrap();
    assert_eq!(reloaded.context.message_count(), before + 1);
    assert_last_turn(&reloaded, "I pry at the door", None);
    assert_eq!(reloaded.revision, 1);
}

#[tokio::test]
async fn test_blank_reply_is_a_failure() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();
    harness.expect_narrative("   ");

    let outcome = harness.say(campaign.id, "Hello?").await.unwrap();
    assert_degraded(&outcome);

    let reloaded = harness.reload(campaign.id).await.unwrap();
    assert!(reloaded
        .context
        .history()
        .all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn test_campaign_continues_after_failure() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    harness
        .expect_failure("timeout upstream")
        .expect_narrative("The door finally gives way.");
    harness.say(campaign.id, "I pry at the door").await.unwrap();
    harness.say(campaign.id, "I try again").await.unwrap();

    let reloaded = harness.reload(campaign.id).await.unwrap();
    assert_turn_count(&reloaded, 2);
    assert_last_turn(&reloaded, "I try again", Some("The door finally gives way."));
}

#[tokio::test]
async fn test_slow_narrator_times_out() {
    let config = EngineConfig::default()
        .with_narrator(NarratorOptions::default().with_timeout(Duration::from_millis(50)));
    let harness = TestHarness::with_config(config).await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    harness.expect_delay(Duration::from_secs(5), "Too late.");
    let outcome = harness.say(campaign.id, "I wait").await.unwrap();

    assert_degraded(&outcome);
    assert!(outcome.failure.unwrap().contains("no reply within"));
    let reloaded = harness.reload(campaign.id).await.unwrap();
    assert_last_turn(&reloaded, "I wait", None);
}

// =============================================================================
// Rejected turns
// =============================================================================

#[tokio::test]
async fn test_invalid_input_commits_nothing() {
    let config = EngineConfig::default().with_max_input_chars(20);
    let harness = TestHarness::with_config(config).await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    let err = harness.say(campaign.id, "   ").await.unwrap_err();
    assert!(matches!(err, CampaignError::Validation(ValidationError::EmptyInput)));

    let err = harness
        .say(campaign.id, "I recite the entire dwarven genealogy")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Validation(ValidationError::InputTooLong { max: 20, .. })
    ));

    assert_eq!(harness.narrator.call_count(), 0);
    let reloaded = harness.reload(campaign.id).await.unwrap();
    assert_eq!(reloaded.revision, 0);
    assert_turn_count(&reloaded, 0);
}

#[tokio::test]
async fn test_unknown_campaign() {
    let harness = TestHarness::new().await.unwrap();
    let missing = CampaignId::new();

    assert!(matches!(
        harness.say(missing, "hello").await,
        Err(CampaignError::NotFound(_))
    ));
    assert!(matches!(
        harness.reload(missing).await,
        Err(CampaignError::NotFound(_))
    ));
    assert!(matches!(
        harness.engine.recent_turns(missing, None).await,
        Err(CampaignError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_character_is_rejected() {
    let harness = TestHarness::new().await.unwrap();

    let err = harness
        .engine
        .create_campaign(
            harness.user.id,
            NewCampaign::new("Broken", NewCharacter::new("Thorin", "Nain", "Guerrier").with_level(25)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Validation(ValidationError::LevelOutOfRange(25))
    ));

    let err = harness
        .engine
        .create_campaign(harness.user.id, NewCampaign::new("  ", sample_character("Aria")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Validation(ValidationError::MissingField("campaign name"))
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_turns_are_serialized() {
    let harness = TestHarness::new().await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    harness
        .expect_delay(Duration::from_millis(100), "first reply")
        .expect_narrative("second reply");

    let (first, second) = tokio::join!(
        harness.say(campaign.id, "first action"),
        harness.say(campaign.id, "second action"),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.revision, 1);
    assert_eq!(second.revision, 2);

    let reloaded = harness.reload(campaign.id).await.unwrap();
    let turns = reloaded.context.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].player, "first action");
    assert_eq!(turns[0].dm.as_deref(), Some("first reply"));
    assert_eq!(turns[1].player, "second action");
    assert_eq!(turns[1].dm.as_deref(), Some("second reply"));

    // the second prompt already saw the first turn
    let prompts = harness.narrator.prompts();
    assert_eq!(prompts[1].messages.len(), 3);
}

#[tokio::test]
async fn test_campaigns_do_not_share_context() {
    let harness = TestHarness::new().await.unwrap();
    let mine = harness.start_campaign().await.unwrap();
    let other = harness
        .engine
        .create_campaign(harness.user.id, NewCampaign::new("Sunken Temple", sample_character("Aria")))
        .await
        .unwrap();

    harness.expect_narrative("Dust everywhere.");
    harness.say(mine.id, "I look around").await.unwrap();

    assert_turn_count(&harness.reload(mine.id).await.unwrap(), 1);
    assert_turn_count(&harness.reload(other.id).await.unwrap(), 0);
}

// =============================================================================
// Display and listing
// =============================================================================

#[tokio::test]
async fn test_recent_turns_window() {
    let config = EngineConfig::default().with_display_turns(10);
    let harness = TestHarness::with_config(config).await.unwrap();
    let campaign = harness.start_campaign().await.unwrap();

    for i in 1..=15 {
        harness.expect_narrative(format!("outcome {i}"));
        harness.say(campaign.id, &format!("action {i}")).await.unwrap();
    }

    let recent = harness.engine.recent_turns(campaign.id, None).await.unwrap();
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0].player, "action 6");
    assert_eq!(recent[9].player, "action 15");

    let all = harness.engine.recent_turns(campaign.id, Some(50)).await.unwrap();
    assert_eq!(all.len(), 15);

    // display never changes the stored log
    assert_turn_count(&harness.reload(campaign.id).await.unwrap(), 15);
}

#[tokio::test]
async fn test_list_most_recently_played_first() {
    let harness = TestHarness::new().await.unwrap();
    let older = harness.start_campaign().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = harness
        .engine
        .create_campaign(harness.user.id, NewCampaign::new("Sunken Temple", sample_character("Aria")))
        .await
        .unwrap();

    let listed = harness.engine.list_campaigns_for_user(harness.user.id).await.unwrap();
    assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

    tokio::time::sleep(Duration::from_millis(5)).await;
    harness.expect_narrative("The mine welcomes you back.");
    harness.say(older.id, "I return").await.unwrap();

    let listed = harness.engine.list_campaigns_for_user(harness.user.id).await.unwrap();
    assert_eq!(listed[0].id, older.id);
    assert_eq!(listed[0].character_name, "Thorin");
    assert_eq!(listed[0].turn_count, 1);

    let stranger = harness.engine.ensure_user("stranger").await.unwrap();
    assert!(harness
        .engine
        .list_campaigns_for_user(stranger.id)
        .await
        .unwrap()
        .is_empty());
}
