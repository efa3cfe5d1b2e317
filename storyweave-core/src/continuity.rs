//! Narrative continuity: branch position, location, party and act progress.
//!
//! Inference functions (`infer_*`) read state and ask the model; `apply_*`
//! and the other mutators change state. The facade runs every inference for
//! a turn before applying any of them.
//!
//! Claims that do not match the world exactly are dropped without error.

use crate::backend::Prompt;
use crate::branch::NodeId;
use crate::generator::StructuredGenerator;
use crate::shape::{Field, Shape};
use crate::state::{CurrentLocation, GameState};
use serde::Deserialize;
use std::collections::BTreeSet;

pub const LOCATION_PURPOSE: &str = "location_check";
pub const BACKSTORY_PURPOSE: &str = "backstory_visits";

lazy_static::lazy_static! {
    /// `Name: "..."` at the start of a line.
    static ref SPEAKER_LINE: regex_lite::Regex =
        regex_lite::Regex::new(r#"^\s*([^:"\n]+?)\s*:\s*["“]"#).expect("valid regex");
}

/// Party membership changes from one recomputation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl PartyChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ============================================================================
// Branches
// ============================================================================

/// Record an accepted choice: mint a node, move to it, remember the text.
pub fn record_choice(state: &mut GameState, choice: &str) -> NodeId {
    let node = state.branches.advance(choice);
    state.choice_log.push(choice.to_string());
    tracing::debug!(node, choice, "Recorded choice");
    node
}

// ============================================================================
// Locations
// ============================================================================

/// Move the player to `claim` if it is exactly the name of a subarea.
pub fn apply_location_claim(state: &mut GameState, claim: &str) -> bool {
    let Some(entry) = state.locations.subarea(claim) else {
        tracing::debug!(claim, "Rejected location claim");
        return false;
    };
    let region = entry.parent.clone().unwrap_or_default();
    let description = entry.description.clone();

    state.current_location = Some(CurrentLocation {
        region,
        subarea: claim.to_string(),
        description,
    });
    state.visited_locations.insert(claim.to_string());
    tracing::info!(location = claim, "Player moved");
    true
}

#[derive(Debug, Deserialize)]
struct LocationClaim {
    moved: bool,
    #[serde(default)]
    new_location: Option<String>,
}

fn location_claim_shape() -> Shape {
    Shape::record(vec![
        Field::required("moved", Shape::Bool),
        Field::optional("new_location", Shape::text()),
    ])
}

/// Ask whether the scene and choice moved the player. Returns the claimed
/// destination, unvalidated.
pub async fn infer_location_transition(
    generator: &StructuredGenerator,
    state: &GameState,
    scene: &str,
    choice: &str,
) -> Option<String> {
    if state.locations.is_empty() {
        return None;
    }
    let places: Vec<&str> = state.locations.names().collect();
    let user = format!(
        "SCENE:\n{scene}\n\nCHOICE:\n{choice}\n\nValid locations:\n{}\n\n\
         Did the player move to a different location in this scene, including after their choice? \
         If so, set moved to true and new_location to a name from the list.",
        serde_json::to_string(&places).unwrap_or_default()
    );
    let prompt = Prompt::new(LOCATION_PURPOSE, user)
        .with_system(include_str!("prompts/continuity.txt"))
        .with_max_tokens(100)
        .with_temperature(0.0);

    let claim = generator
        .generate(
            &prompt,
            &location_claim_shape(),
            LocationClaim {
                moved: false,
                new_location: None,
            },
        )
        .await
        .into_value();

    claim.new_location.filter(|_| claim.moved)
}

/// Ask which places the backstory implies the player visited before play.
pub async fn infer_backstory_visits(
    generator: &StructuredGenerator,
    state: &GameState,
) -> Vec<String> {
    let Some(outline) = &state.outline else {
        return Vec::new();
    };
    let backstory = outline.player_backstory.origin_story.trim();
    if backstory.is_empty() || state.locations.is_empty() {
        return Vec::new();
    }

    let places: Vec<&str> = state.locations.names().collect();
    let user = format!(
        "The player has this backstory:\n\"{backstory}\"\n\nPossible locations:\n{}\n\n\
         Based only on the backstory, which of these locations has the player most likely \
         visited before the game began? Answer with a list of names from the list.",
        serde_json::to_string(&places).unwrap_or_default()
    );
    let prompt = Prompt::new(BACKSTORY_PURPOSE, user)
        .with_system(include_str!("prompts/continuity.txt"))
        .with_max_tokens(300)
        .with_temperature(0.7);

    generator
        .generate(&prompt, &Shape::list(Shape::text(), 0, 32), Vec::new())
        .await
        .into_value()
}

/// Union exact-match names into the backstory visit set. Returns how many
/// were new.
pub fn apply_backstory_visits(state: &mut GameState, names: &[String]) -> usize {
    let mut added = 0;
    for name in names {
        if !state.locations.contains(name) {
            tracing::debug!(location = %name, "Ignored unknown backstory location");
            continue;
        }
        if state.visited_by_backstory.insert(name.clone()) {
            tracing::info!(location = %name, "Backstory visit inferred");
            added += 1;
        }
    }
    added
}

/// Infer and apply backstory visits in one step.
pub async fn seed_backstory_visits(generator: &StructuredGenerator, state: &mut GameState) -> usize {
    let names = infer_backstory_visits(generator, state).await;
    apply_backstory_visits(state, &names)
}

// ============================================================================
// Party
// ============================================================================

/// Names of speakers on `Name: "..."` lines, as written.
pub fn dialogue_speakers(scene: &str) -> Vec<&str> {
    scene
        .lines()
        .filter_map(|line| SPEAKER_LINE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

/// Re-derive party membership from a scene.
///
/// NPCs who speak join; members neither speaking nor named leave; members
/// only named stay if already present. Matching is case-insensitive.
pub fn recompute_party(state: &mut GameState, scene: &str) -> PartyChange {
    let Some(outline) = &state.outline else {
        return PartyChange::default();
    };

    let speakers: BTreeSet<String> = dialogue_speakers(scene)
        .into_iter()
        .map(str::to_lowercase)
        .collect();
    let scene_lower = scene.to_lowercase();

    let mut speaking = BTreeSet::new();
    let mut named = BTreeSet::new();
    for npc in &outline.npcs {
        let name = npc.name.to_lowercase();
        if name.is_empty() {
            continue;
        }
        if speakers.contains(&name) {
            speaking.insert(npc.id.clone());
        }
        if scene_lower.contains(&name) {
            named.insert(npc.id.clone());
        }
    }

    let mut change = PartyChange::default();
    let mut party: Vec<String> = Vec::with_capacity(state.party.len());
    for id in &state.party {
        if speaking.contains(id) || named.contains(id) {
            party.push(id.clone());
        } else {
            change.removed.push(id.clone());
        }
    }
    for npc in &outline.npcs {
        if speaking.contains(&npc.id) && !party.contains(&npc.id) {
            party.push(npc.id.clone());
            change.added.push(npc.id.clone());
        }
    }

    if !change.is_empty() {
        tracing::info!(added = ?change.added, removed = ?change.removed, "Party changed");
    }
    state.party = party;
    change
}

// ============================================================================
// Scenes and acts
// ============================================================================

/// Store a freshly produced scene and clear any pending choice.
///
/// When `counts_toward_act` is set the act counter advances, which may move
/// the story into the next act. Returns whether the act changed.
pub fn accept_scene(
    state: &mut GameState,
    scene: &str,
    choices: Vec<String>,
    counts_toward_act: bool,
) -> bool {
    state.recent_scenes.push(scene);
    state.last_scene_text = Some(scene.to_string());
    state.last_scene_choices = choices;
    state.pending_choice = None;

    if !counts_toward_act {
        return false;
    }
    let advanced = state.acts.record_scene();
    if advanced {
        tracing::info!(
            act = state.acts.current + 1,
            title = state.acts.current_title().unwrap_or_default(),
            "Advanced to next act"
        );
    }
    advanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::testing::{fixtures, MockBackend};
    use serde_json::json;
    use std::sync::Arc;

    fn started() -> GameState {
        let mut state = GameState::new();
        state.apply_outline(fixtures::outline());
        state
    }

    #[test]
    fn test_record_choice_keeps_tree() {
        let mut state = started();
        for choice in ["Knock", "Enter", "Knock"] {
            record_choice(&mut state, choice);
        }
        assert_eq!(state.branches.position(), 3);
        assert_eq!(state.choice_log, vec!["Knock", "Enter", "Knock"]);
        assert!(state.branches.is_consistent());
    }

    #[test]
    fn test_location_claim_requires_exact_subarea() {
        let mut state = started();
        state.current_location = None;
        state.visited_locations.clear();

        assert!(!apply_location_claim(&mut state, "old mill shack"));
        assert!(!apply_location_claim(&mut state, "old mill"));
        assert!(!apply_location_claim(&mut state, "Riverlands"));
        assert!(state.current_location.is_none());
        assert!(state.visited_locations.is_empty());

        assert!(apply_location_claim(&mut state, "Ferry Crossing"));
        let loc = state.current_location.clone().unwrap();
        assert_eq!(loc.region, "Riverlands");
        assert_eq!(loc.subarea, "Ferry Crossing");
        assert!(state.visited_locations.contains("Ferry Crossing"));
    }

    #[test]
    fn test_rejected_claim_leaves_location() {
        let mut state = started();
        let before = state.current_location.clone();
        assert!(!apply_location_claim(&mut state, "old mill shack"));
        assert_eq!(state.current_location, before);
    }

    #[test]
    fn test_party_recompute() {
        let mut state = started();
        // npc1 = Mara Quill, npc2 = Bram Holt, npc3 = Ivo Senn
        state.party = vec!["npc2".into(), "npc3".into()];
        let scene = "Rain hammers the roof.\n\
                     Mara Quill: \"We leave at dawn.\"\n\
                     You glance at Bram Holt, who says nothing.";

        let change = recompute_party(&mut state, scene);
        assert_eq!(state.party, vec!["npc2".to_string(), "npc1".to_string()]);
        assert_eq!(change.added, vec!["npc1".to_string()]);
        assert_eq!(change.removed, vec!["npc3".to_string()]);
    }

    #[test]
    fn test_named_only_is_not_added() {
        let mut state = started();
        state.party.clear();
        recompute_party(&mut state, "Someone mentions Bram Holt in passing.");
        assert!(state.party.is_empty());
    }

    #[test]
    fn test_speaker_match_is_case_insensitive() {
        let mut state = started();
        state.party.clear();
        recompute_party(&mut state, "IVO SENN: \"Over here!\"");
        assert_eq!(state.party, vec!["npc3".to_string()]);
    }

    #[test]
    fn test_dialogue_speakers() {
        let scene = "Narration: none here\nMara Quill: \"Hi.\"\n  Ivo Senn : “Hello.”\nNo colon \"quote\"";
        assert_eq!(dialogue_speakers(scene), vec!["Mara Quill", "Ivo Senn"]);
    }

    #[test]
    fn test_accept_scene_counts_toward_act() {
        let mut state = started();
        assert_eq!(state.acts.targets[0], 3);

        assert!(!accept_scene(&mut state, "one", vec![], true));
        assert!(!accept_scene(&mut state, "stall", vec![], false));
        assert!(!accept_scene(&mut state, "two", vec![], true));
        assert!(accept_scene(&mut state, "three", vec![], true));
        assert_eq!(state.acts.current, 1);
        assert_eq!(state.acts.scenes_in_act, 0);
        assert_eq!(state.last_scene_text.as_deref(), Some("three"));

        for _ in 0..10 {
            accept_scene(&mut state, "more", vec![], true);
        }
        assert_eq!(state.acts.current, 1);
    }

    #[tokio::test]
    async fn test_infer_location_transition() {
        let mock = Arc::new(MockBackend::new().on_structured(
            LOCATION_PURPOSE,
            json!({ "moved": true, "new_location": "Ferry Crossing" }),
        ));
        let generator = StructuredGenerator::new(mock.clone(), RetryPolicy::immediate(2));
        let state = started();

        let claim = infer_location_transition(&generator, &state, "You walk to the ferry.", "Go")
            .await;
        assert_eq!(claim.as_deref(), Some("Ferry Crossing"));
        let prompt = mock.prompts().pop().unwrap();
        assert!(prompt.user.contains("\"Old Mill\""));
    }

    #[tokio::test]
    async fn test_not_moved_yields_no_claim() {
        let mock = Arc::new(MockBackend::new().on_structured(
            LOCATION_PURPOSE,
            json!({ "moved": false, "new_location": "Ferry Crossing" }),
        ));
        let generator = StructuredGenerator::new(mock, RetryPolicy::immediate(2));
        let claim = infer_location_transition(&generator, &started(), "Stay.", "Wait").await;
        assert!(claim.is_none());
    }

    #[tokio::test]
    async fn test_seed_backstory_visits_is_idempotent_union() {
        let mock = Arc::new(MockBackend::new().on_structured(
            BACKSTORY_PURPOSE,
            json!(["Harbor Docks", "Fish Market", "Atlantis"]),
        ));
        let generator = StructuredGenerator::new(mock, RetryPolicy::immediate(2));
        let mut state = started();
        assert!(state.visited_by_backstory.contains("Harbor Docks"));

        assert_eq!(seed_backstory_visits(&generator, &mut state).await, 1);
        assert_eq!(seed_backstory_visits(&generator, &mut state).await, 0);
        assert!(state.visited_by_backstory.contains("Fish Market"));
        assert!(!state.visited_by_backstory.contains("Atlantis"));
    }
}
