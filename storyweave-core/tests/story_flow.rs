//! End-to-end tests of the engine facade against a scripted backend.
//!
//! No network access is needed; every generation request is answered by
//! `MockBackend`, and all files go to a temporary directory.

use serde_json::json;
use std::sync::Arc;
use storyweave_core::testing::fixtures;
use storyweave_core::{
    Engine, EngineConfig, GameState, GameStore, MockBackend, PremiseMode, RetryPolicy,
    StoragePaths, TurnPhase,
};
use tempfile::TempDir;

const FIRST_SCENE: &str = "Fog rolls over Keeper's Gate.\n\
                           Maren Vell: \"Stay close.\"\n\
                           wren: \"Wait for me!\"\n\
                           1. Follow Maren\n\
                           2. Go to the market\n\
                           3. Wait";
const SECOND_SCENE: &str = "The market is loud with haggling.\n1. Buy oil\n2. Listen\n3. Leave";

fn config(dir: &TempDir, attempts: u32) -> EngineConfig {
    EngineConfig::default()
        .with_paths(StoragePaths::under(dir.path()))
        .with_retry(RetryPolicy::immediate(attempts))
}

fn companion(name: &str, trust: f64) -> serde_json::Value {
    json!({
        "name": name,
        "description": "A traveler.",
        "visual_description": "Dusty cloak.",
        "traits": { "trust": trust, "fear": 1, "affection": 5 },
    })
}

fn scripted() -> MockBackend {
    MockBackend::new()
        .on_structured("backstory_visits", json!(["Heron Camp", "Scriptorium", "Atlantis"]))
        .on_structured(
            "companions",
            json!([companion("Tamsin", 6.0), companion("Rook", 4.0), companion("Pell", 5.0)]),
        )
        .on_structured("player_traits", json!({ "bravery": 0.9, "inquisitiveness": -0.2 }))
        .on_structured("companion_traits", json!({ "trust": 0.3 }))
        .on_structured("location_check", json!({ "moved": true, "new_location": "Wick Market" }))
        .on_text("personality_analysis", "Bold and watchful.")
        .on_text("scene", FIRST_SCENE)
        .on_text("scene", SECOND_SCENE)
        .on_text("image_prompt", "A loud market stall at dusk")
        .with_images(b"png".to_vec())
}

#[tokio::test]
async fn test_full_playthrough() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mock = Arc::new(scripted());
    let mut engine = Engine::new(config(&temp_dir, 3), mock.clone());

    // Setup
    let candidates = engine
        .start_new_game("dark fantasy", "ink wash", PremiseMode::Default)
        .await
        .expect("new game");
    assert_eq!(candidates.len(), 3);
    assert_eq!(engine.phase(), TurnPhase::NeedCompanion);

    let state = engine.state();
    assert_eq!(state.party, vec!["npc1".to_string()]);
    let location = state.current_location.clone().unwrap();
    assert_eq!((location.region.as_str(), location.subarea.as_str()), ("Lanternhold", "Keeper's Gate"));
    for place in ["Heron Camp", "Wick Market", "Scriptorium"] {
        assert!(state.visited_by_backstory.contains(place), "{place} should be known");
    }
    assert!(!state.visited_by_backstory.contains("Atlantis"));

    let chosen = engine.select_companion(0).await.expect("select companion");
    assert_eq!(chosen.name, "Tamsin");
    assert_eq!(engine.state().companion_profile.trust, 6.0);
    // Player, companion and six NPCs.
    assert_eq!(engine.state().portraits.len(), 8);
    assert!(engine.state().portraits.values().all(|p| p.is_file()));

    // First scene, cached on repeat
    let text = engine.get_current_text().await.expect("scene");
    assert!(text.starts_with("Fog rolls over Keeper's Gate."));
    assert!(text.contains("Wren: \"Wait for me!\""));
    let calls = mock.text_calls();
    assert_eq!(engine.get_current_text().await.unwrap(), text);
    assert_eq!(mock.text_calls(), calls);
    assert_eq!(engine.state().branches.len(), 1);
    assert_eq!(engine.state().acts.scenes_in_act, 1);

    let choices = engine.get_current_choices().await.unwrap();
    assert_eq!(choices, vec!["Follow Maren", "Go to the market", "Wait"]);

    // Offered choice
    let outcome = engine.make_choice("Follow Maren").await.expect("choice");
    assert!(outcome.offered);
    assert_eq!(outcome.node, Some(1));
    assert_eq!(outcome.moved_to.as_deref(), Some("Wick Market"));
    assert_eq!(outcome.party.added, vec!["npc5".to_string()]);

    let state = engine.state();
    assert_eq!(state.party, vec!["npc1".to_string(), "npc5".to_string()]);
    assert_eq!(state.player_profile.bravery, 5.5);
    assert_eq!(state.player_profile.curiosity, 6.8);
    assert_eq!(state.companion_profile.trust, 6.3);
    assert_eq!(state.personality_analysis, "Bold and watchful.");
    assert_eq!(state.current_location.as_ref().unwrap().region, "Lanternhold");
    assert!(state.visited_locations.contains("Wick Market"));
    assert_eq!(engine.phase(), TurnPhase::InScene);

    // The pending choice steers the next scene
    let text = engine.get_current_text().await.unwrap();
    assert_eq!(text, "The market is loud with haggling.");
    let scene_prompt = mock
        .prompts()
        .into_iter()
        .filter(|p| p.purpose == "scene")
        .last()
        .unwrap();
    assert!(scene_prompt.user.contains("The player chose: 'Follow Maren'."));
    assert!(scene_prompt.user.contains("Fog rolls over Keeper's Gate."));
    assert_eq!(engine.state().acts.scenes_in_act, 2);

    // Free text mints no node and leaves traits alone
    let profile = engine.state().player_profile;
    let outcome = engine.make_choice("I hum a tune").await.unwrap();
    assert!(!outcome.offered);
    assert_eq!(outcome.node, None);
    assert_eq!(engine.state().branches.len(), 2);
    assert_eq!(engine.state().player_profile, profile);
    assert_eq!(engine.state().pending_choice.as_deref(), Some("I hum a tune"));

    // Image drawn once per scene
    let image = engine.get_current_image_path().await.unwrap().expect("image");
    assert_eq!(image, temp_dir.path().join("images/generated_images/1.png"));
    let drawn = mock.image_calls();
    assert_eq!(engine.get_current_image_path().await.unwrap(), Some(image));
    assert_eq!(mock.image_calls(), drawn);
    assert!(engine.state().branches.is_consistent());

    // Resume picks up exactly where we left off
    let mut resumed = Engine::new(config(&temp_dir, 3), Arc::new(MockBackend::new()));
    assert!(resumed.has_save());
    assert_eq!(resumed.resume().await.unwrap(), TurnPhase::AwaitingChoice);
    assert_eq!(resumed.state(), engine.state());
}

#[tokio::test]
async fn test_acts_advance_and_traits_stay_bounded() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut state = GameState::new();
    state.genre = Some("mystery".into());
    state.apply_outline(fixtures::outline());
    state.companion = Some(fixtures::companion());
    GameStore::new(StoragePaths::under(temp_dir.path()))
        .save(&state)
        .await
        .unwrap();

    let mock = Arc::new(
        MockBackend::new()
            .on_text("scene", "The river rises.\n1. Climb\n2. Swim\n3. Shout")
            .on_structured("player_traits", json!({ "bravery": 4, "trust": -3 }))
            .on_structured("companion_traits", json!({ "fear": 2, "affection": -9 }))
            .with_images(b"png".to_vec()),
    );
    let mut engine = Engine::new(config(&temp_dir, 2), mock);
    assert_eq!(engine.resume().await.unwrap(), TurnPhase::InScene);
    // Older saves get the player's portrait on resume.
    assert!(engine.state().portraits.contains_key("Ash"));

    for _ in 0..20 {
        engine.get_current_text().await.unwrap();
        engine.make_choice("Climb").await.unwrap();
    }
    engine.get_current_text().await.unwrap();

    let state = engine.state();
    // Targets [3, 2]: act two is the last act and never advances further.
    assert_eq!(state.acts.current, 1);
    assert_eq!(state.acts.scenes_in_act, 21 - 3);

    assert_eq!(state.player_profile.bravery, 10.0);
    assert_eq!(state.player_profile.trust, 0.0);
    assert_eq!(state.companion_profile.fear, 10.0);
    assert_eq!(state.companion_profile.affection, 0.0);

    let ids: Vec<usize> = state.branches.nodes().iter().map(|n| n.id).collect();
    assert_eq!(ids, (0..=20).collect::<Vec<_>>());
    assert!(state.branches.is_consistent());
    assert_eq!(state.branches.path_choices(), vec!["Climb"; 20]);
}

#[tokio::test]
async fn test_invalid_scenes_exhaust_retries_then_stall() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mock = Arc::new(MockBackend::new().on_text("scene", "1. Only\n2. Choices\n3. Here"));
    let mut engine = Engine::new(config(&temp_dir, 3), mock.clone());

    engine
        .start_new_game("noir", "charcoal", PremiseMode::Default)
        .await
        .unwrap();
    engine.select_companion(2).await.unwrap();

    let before = mock.text_calls();
    let text = engine.get_current_text().await.expect("fallback is not an error");
    assert_eq!(mock.text_calls() - before, 3);
    assert_eq!(text, "The story stalls for a moment as you consider your next move.");
    assert_eq!(engine.state().acts.scenes_in_act, 0);
    assert_eq!(
        engine.get_current_choices().await.unwrap(),
        vec!["Continue cautiously and observe.", "Take a bold action.", "Reflect silently."]
    );
}

#[tokio::test]
async fn test_new_game_archives_previous_one() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut engine = Engine::new(config(&temp_dir, 1), Arc::new(MockBackend::new()));

    engine.start_new_game("noir", "charcoal", PremiseMode::Default).await.unwrap();
    engine.start_new_game("noir", "charcoal", PremiseMode::Default).await.unwrap();

    let archived = temp_dir.path().join("archive/save1/story/game_state.json");
    assert!(archived.is_file());
    assert!(engine.has_save());
}

#[tokio::test]
async fn test_failed_saves_do_not_interrupt_play() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let paths = StoragePaths::under(temp_dir.path());
    // A directory where the save file should go makes every save fail.
    std::fs::create_dir_all(&paths.save_file).unwrap();
    std::fs::write(paths.save_file.join("keep"), b"").unwrap();

    let mock = Arc::new(scripted());
    let mut engine = Engine::new(config(&temp_dir, 2), mock);
    assert!(engine.save().await.is_err());

    engine
        .start_new_game("dark fantasy", "ink wash", PremiseMode::Default)
        .await
        .expect("new game despite failed save");
    engine.select_companion(0).await.expect("companion despite failed save");

    let first = engine.get_current_text().await.expect("scene despite failed save");
    assert!(first.starts_with("Fog rolls over Keeper's Gate."));
    let outcome = engine.make_choice("Follow Maren").await.expect("choice despite failed save");
    assert_eq!(outcome.node, Some(1));
    let second = engine.get_current_text().await.expect("next scene despite failed save");
    assert_eq!(second, "The market is loud with haggling.");

    let state = engine.state();
    assert_eq!(state.choice_log, vec!["Follow Maren".to_string()]);
    assert_eq!(state.branches.len(), 2);
    assert_eq!(state.current_location.as_ref().unwrap().subarea, "Wick Market");
    assert_eq!(state.player_profile.bravery, 5.5);
    assert!(!engine.has_save());
}
