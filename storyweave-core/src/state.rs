//! The game state document.
//!
//! [`GameState`] is the single source of truth for a playthrough. It is
//! mutated only by the sequential turn logic and persisted whole after each
//! turn. Every field defaults, so older documents missing newer fields still
//! load.

use crate::branch::BranchTree;
use crate::engine::TurnPhase;
use crate::premise::{NarrativeOutline, StartingTraits};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// Scene texts kept as generation context.
pub const SCENE_MEMORY_LEN: usize = 4;

pub const TRAIT_MIN: f64 = 0.0;
pub const TRAIT_MAX: f64 = 10.0;

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Region,
    Subarea,
}

/// One named place in the world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub description: String,
    pub kind: LocationKind,
    /// Parent region; set for subareas only.
    pub parent: Option<String>,
}

/// Every place in the world, keyed by exact name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationHierarchy {
    entries: BTreeMap<String, LocationEntry>,
}

impl LocationHierarchy {
    /// Build from the outline's regions and subareas.
    pub fn from_outline(outline: &NarrativeOutline) -> Self {
        let mut entries = BTreeMap::new();
        for region in &outline.key_locations {
            entries.insert(
                region.name.clone(),
                LocationEntry {
                    description: String::new(),
                    kind: LocationKind::Region,
                    parent: None,
                },
            );
            for sub in &region.subareas {
                entries.insert(
                    sub.name.clone(),
                    LocationEntry {
                        description: sub.description.clone(),
                        kind: LocationKind::Subarea,
                        parent: Some(region.name.clone()),
                    },
                );
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&LocationEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The subarea entry for exactly `name`, if it is one.
    pub fn subarea(&self, name: &str) -> Option<&LocationEntry> {
        self.get(name).filter(|e| e.kind == LocationKind::Subarea)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Places one step away: a subarea's region and sibling subareas, or a
    /// region's subareas.
    pub fn neighbors(&self, name: &str) -> Vec<&str> {
        let Some((key, entry)) = self.entries.get_key_value(name) else {
            return Vec::new();
        };
        let name = key.as_str();
        let region = match entry.kind {
            LocationKind::Region => name,
            LocationKind::Subarea => match entry.parent.as_deref() {
                Some(parent) => parent,
                None => return Vec::new(),
            },
        };

        let mut out: Vec<&str> = Vec::new();
        if region != name {
            out.push(region);
        }
        out.extend(
            self.entries
                .iter()
                .filter(|(n, e)| e.parent.as_deref() == Some(region) && n.as_str() != name)
                .map(|(n, _)| n.as_str()),
        );
        out
    }
}

/// Where the player is now. Always names a subarea of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentLocation {
    pub region: String,
    pub subarea: String,
    pub description: String,
}

// ============================================================================
// Acts
// ============================================================================

/// Five-act progression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActProgress {
    pub titles: Vec<String>,
    /// Scenes to play in each act before advancing.
    pub targets: Vec<u32>,
    pub current: usize,
    pub scenes_in_act: u32,
}

impl ActProgress {
    pub fn from_outline(outline: &NarrativeOutline) -> Self {
        Self {
            titles: outline.five_act_plan.iter().map(|a| a.title.clone()).collect(),
            targets: outline.five_act_plan.iter().map(|a| a.scenes_count).collect(),
            current: 0,
            scenes_in_act: 0,
        }
    }

    pub fn is_last_act(&self) -> bool {
        self.current + 1 >= self.titles.len()
    }

    pub fn current_title(&self) -> Option<&str> {
        self.titles.get(self.current).map(String::as_str)
    }

    /// Count one accepted scene. Returns `true` if the act advanced.
    ///
    /// On the last act the counter keeps counting and the act never changes.
    pub fn record_scene(&mut self) -> bool {
        self.scenes_in_act += 1;
        let target = self.targets.get(self.current).copied().unwrap_or(u32::MAX);
        if self.scenes_in_act >= target && !self.is_last_act() {
            self.current += 1;
            self.scenes_in_act = 0;
            return true;
        }
        false
    }
}

// ============================================================================
// Profiles and companions
// ============================================================================

/// The player's inferred personality, each trait in [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerProfile {
    pub bravery: f64,
    pub curiosity: f64,
    pub empathy: f64,
    pub communication: f64,
    pub trust: f64,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self::from(StartingTraits::default())
    }
}

impl From<StartingTraits> for PlayerProfile {
    fn from(t: StartingTraits) -> Self {
        Self {
            bravery: f64::from(t.bravery),
            curiosity: f64::from(t.curiosity),
            empathy: f64::from(t.empathy),
            communication: f64::from(t.communication),
            trust: f64::from(t.trust),
        }
    }
}

/// How the companion feels about the player, each trait in [0, 10].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionProfile {
    pub trust: f64,
    pub fear: f64,
    pub affection: f64,
}

impl Default for CompanionProfile {
    fn default() -> Self {
        Self {
            trust: 5.0,
            fear: 0.0,
            affection: 5.0,
        }
    }
}

/// A companion character, offered at game start and chosen once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub name: String,
    pub description: String,
    pub visual_description: String,
    #[serde(default)]
    pub traits: CompanionProfile,
}

// ============================================================================
// Scene memory
// ============================================================================

/// Most recent scene texts, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneMemory {
    scenes: VecDeque<String>,
}

impl SceneMemory {
    pub fn push(&mut self, scene: impl Into<String>) {
        self.scenes.push_back(scene.into());
        while self.scenes.len() > SCENE_MEMORY_LEN {
            self.scenes.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scenes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

// ============================================================================
// Game state
// ============================================================================

/// Everything needed to resume a playthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub version: u32,
    pub genre: Option<String>,
    pub artstyle: Option<String>,

    pub branches: BranchTree,
    /// Accepted choice texts, oldest first.
    pub choice_log: Vec<String>,
    pub outline: Option<NarrativeOutline>,

    pub locations: LocationHierarchy,
    pub current_location: Option<CurrentLocation>,
    pub acts: ActProgress,
    /// NPC ids accompanying the player, in joining order.
    pub party: Vec<String>,

    pub player_profile: PlayerProfile,
    pub companion: Option<Companion>,
    pub companion_profile: CompanionProfile,
    pub personality_analysis: String,

    pub recent_scenes: SceneMemory,
    pub visited_locations: BTreeSet<String>,
    pub visited_by_backstory: BTreeSet<String>,

    /// Character name to portrait file.
    pub portraits: BTreeMap<String, PathBuf>,
    /// Candidates offered but not yet chosen.
    pub companion_options: Vec<Companion>,

    pub last_scene_text: Option<String>,
    pub last_scene_choices: Vec<String>,
    pub last_scene_image: Option<PathBuf>,
    /// Scene text the current image was drawn from.
    pub last_image_source: Option<String>,
    /// Choice text recorded since the last scene was produced.
    pub pending_choice: Option<String>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            version: SAVE_VERSION,
            genre: None,
            artstyle: None,
            branches: BranchTree::new(),
            choice_log: Vec::new(),
            outline: None,
            locations: LocationHierarchy::default(),
            current_location: None,
            acts: ActProgress::default(),
            party: Vec::new(),
            player_profile: PlayerProfile::default(),
            companion: None,
            companion_profile: CompanionProfile::default(),
            personality_analysis: String::new(),
            recent_scenes: SceneMemory::default(),
            visited_locations: BTreeSet::new(),
            visited_by_backstory: BTreeSet::new(),
            portraits: BTreeMap::new(),
            companion_options: Vec::new(),
            last_scene_text: None,
            last_scene_choices: Vec::new(),
            last_scene_image: None,
            last_image_source: None,
            pending_choice: None,
        }
    }
}

impl GameState {
    /// A fresh state for a new game.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an outline and everything derived from it: hierarchy, acts,
    /// starting traits, starting location, initial party and known places.
    pub fn apply_outline(&mut self, outline: NarrativeOutline) {
        self.locations = LocationHierarchy::from_outline(&outline);
        self.acts = ActProgress::from_outline(&outline);
        self.player_profile = PlayerProfile::from(outline.player_backstory.starting_traits);

        self.current_location = outline.starting_place().map(|(region, place)| CurrentLocation {
            region: region.name.clone(),
            subarea: place.name.clone(),
            description: place.description.clone(),
        });
        if let Some(loc) = &self.current_location {
            self.visited_locations.insert(loc.subarea.clone());
        }

        self.party = outline
            .five_act_plan
            .first()
            .map(|act| act.tie_npc.clone())
            .filter(|id| outline.npc(id).is_some())
            .into_iter()
            .collect();

        let known: Vec<String> = outline
            .player_backstory
            .starting_locations
            .iter()
            .filter(|name| self.locations.contains(name))
            .cloned()
            .collect();
        self.visited_by_backstory.extend(known);

        self.outline = Some(outline);
    }

    /// Which step of the turn loop the game is in.
    pub fn phase(&self) -> TurnPhase {
        if self.outline.is_none() {
            TurnPhase::NeedPremise
        } else if self.companion.is_none() {
            TurnPhase::NeedCompanion
        } else if self.last_scene_text.is_none() || self.pending_choice.is_some() {
            TurnPhase::InScene
        } else {
            TurnPhase::AwaitingChoice
        }
    }

    /// Places the player has been (in play or by backstory), and those plus
    /// their direct neighbors.
    pub fn revealed_map(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let visited: BTreeSet<String> = self
            .visited_locations
            .union(&self.visited_by_backstory)
            .cloned()
            .collect();

        let mut revealed = visited.clone();
        for place in &visited {
            revealed.extend(self.locations.neighbors(place).into_iter().map(str::to_string));
        }
        (visited, revealed)
    }

    /// Display name for an NPC id, if the outline knows it.
    pub fn npc_name(&self, id: &str) -> Option<&str> {
        self.outline
            .as_ref()
            .and_then(|o| o.npc(id))
            .map(|n| n.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_fresh_state_needs_premise() {
        let state = GameState::new();
        assert_eq!(state.phase(), TurnPhase::NeedPremise);
        assert_eq!(state.branches.position(), 0);
        assert_eq!(state.version, SAVE_VERSION);
    }

    #[test]
    fn test_apply_outline_derives_state() {
        let mut state = GameState::new();
        state.apply_outline(fixtures::outline());

        let loc = state.current_location.clone().unwrap();
        assert_eq!(loc.region, "Riverlands");
        assert_eq!(loc.subarea, "Old Mill");
        assert!(state.visited_locations.contains("Old Mill"));
        assert_eq!(state.party, vec!["npc1".to_string()]);
        assert_eq!(state.acts.targets, vec![3, 2]);
        assert_eq!(state.player_profile.curiosity, 7.0);
        assert!(state.visited_by_backstory.contains("Harbor Docks"));
        assert_eq!(state.phase(), TurnPhase::NeedCompanion);
    }

    #[test]
    fn test_hierarchy_kinds() {
        let hierarchy = LocationHierarchy::from_outline(&fixtures::outline());
        assert_eq!(hierarchy.get("Riverlands").unwrap().kind, LocationKind::Region);
        let mill = hierarchy.subarea("Old Mill").unwrap();
        assert_eq!(mill.parent.as_deref(), Some("Riverlands"));
        assert!(hierarchy.subarea("Riverlands").is_none());
        assert!(hierarchy.subarea("old mill").is_none());
    }

    #[test]
    fn test_neighbors_outlive_the_query() {
        let hierarchy = LocationHierarchy::from_outline(&fixtures::outline());
        let region_neighbors = {
            let query = String::from("Riverlands");
            hierarchy.neighbors(&query)
        };
        assert_eq!(region_neighbors, vec!["Ferry Crossing", "Old Mill"]);

        let subarea_neighbors = hierarchy.neighbors("Old Mill");
        assert_eq!(subarea_neighbors, vec!["Riverlands", "Ferry Crossing"]);
        assert!(hierarchy.neighbors("Atlantis").is_empty());
    }

    #[test]
    fn test_revealed_map_includes_neighbors() {
        let mut state = GameState::new();
        state.apply_outline(fixtures::outline());
        state.visited_by_backstory.clear();

        let (visited, revealed) = state.revealed_map();
        assert_eq!(visited.len(), 1);
        assert!(revealed.contains("Old Mill"));
        assert!(revealed.contains("Riverlands"));
        assert!(revealed.contains("Ferry Crossing"));
        assert!(!revealed.contains("Harbor Docks"));
    }

    #[test]
    fn test_act_progress_advances_and_saturates() {
        let mut acts = ActProgress {
            titles: vec!["One".into(), "Two".into()],
            targets: vec![3, 2],
            current: 0,
            scenes_in_act: 0,
        };
        assert!(!acts.record_scene());
        assert!(!acts.record_scene());
        assert!(acts.record_scene());
        assert_eq!((acts.current, acts.scenes_in_act), (1, 0));

        for _ in 0..5 {
            assert!(!acts.record_scene());
        }
        assert_eq!(acts.current, 1);
        assert_eq!(acts.scenes_in_act, 5);
    }

    #[test]
    fn test_scene_memory_is_bounded_fifo() {
        let mut memory = SceneMemory::default();
        for i in 0..6 {
            memory.push(format!("scene {i}"));
        }
        let kept: Vec<&str> = memory.iter().collect();
        assert_eq!(kept, vec!["scene 2", "scene 3", "scene 4", "scene 5"]);
    }

    #[test]
    fn test_loads_document_missing_newer_fields() {
        let json = r#"{
            "version": 1,
            "genre": "noir",
            "choice_log": ["Follow the stranger"],
            "player_profile": { "bravery": 7.5 },
            "some_future_field": { "anything": true }
        }"#;
        let state: GameState = serde_json::from_str(json).unwrap();
        assert_eq!(state.genre.as_deref(), Some("noir"));
        assert_eq!(state.player_profile.bravery, 7.5);
        assert_eq!(state.player_profile.trust, 5.0);
        assert!(state.branches.is_consistent());
        assert!(state.pending_choice.is_none());
        assert_eq!(state.phase(), TurnPhase::NeedPremise);
    }
}
