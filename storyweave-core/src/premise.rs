//! The narrative outline and the premise recipe that produces it.
//!
//! An outline is generated once per game and treated as read-only reference
//! data afterwards: world, factions, mysteries, NPCs, the player's backstory
//! and a five-act plan.

use crate::backend::Prompt;
use crate::error::ValidationError;
use crate::generator::{Generated, StructuredGenerator};
use crate::shape::{Field, Shape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const PURPOSE: &str = "premise";

const DEFAULT_PREMISE_JSON: &str = include_str!("defaults/default_premise.json");

lazy_static::lazy_static! {
    static ref DEFAULT_OUTLINE: NarrativeOutline = serde_json::from_str(DEFAULT_PREMISE_JSON)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Embedded default premise failed to parse");
            NarrativeOutline::default()
        });
}

/// How a new game gets its outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PremiseMode {
    /// Generate a fresh outline for the chosen genre.
    #[default]
    Custom,
    /// Use the pre-authored outline.
    Default,
}

/// The full story plan for one game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeOutline {
    pub world_name: String,
    pub world_overview: String,
    pub key_locations: Vec<KeyLocation>,
    pub factions: Vec<Faction>,
    pub mysteries: Vec<Mystery>,
    pub npcs: Vec<Npc>,
    pub player_backstory: PlayerBackstory,
    pub five_act_plan: Vec<ActPlan>,
}

/// A region and the subareas inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLocation {
    pub name: String,
    pub subareas: Vec<Place>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mystery {
    pub id: String,
    pub prompt: String,
    pub answer: String,
    pub twist: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    pub name: String,
    pub role: String,
    pub description: String,
    pub goal: String,
    pub visual_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerBackstory {
    pub name: String,
    pub origin_story: String,
    pub starting_traits: StartingTraits,
    /// Subareas the player already knows at the start.
    #[serde(default)]
    pub starting_locations: Vec<String>,
}

/// Initial player traits, integers in 1..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartingTraits {
    pub bravery: u8,
    pub curiosity: u8,
    pub empathy: u8,
    pub communication: u8,
    pub trust: u8,
}

impl Default for StartingTraits {
    fn default() -> Self {
        Self {
            bravery: 5,
            curiosity: 5,
            empathy: 5,
            communication: 5,
            trust: 5,
        }
    }
}

/// One act of the five-act plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActPlan {
    pub title: String,
    pub inciting_incident: String,
    pub tied_mystery: String,
    pub tie_npc: String,
    pub twist: String,
    /// Scenes to play before the act advances.
    pub scenes_count: u32,
}

impl NarrativeOutline {
    pub fn npc(&self, id: &str) -> Option<&Npc> {
        self.npcs.iter().find(|n| n.id == id)
    }

    pub fn mystery(&self, id: &str) -> Option<&Mystery> {
        self.mysteries.iter().find(|m| m.id == id)
    }

    /// The first subarea of the first region: where every game starts.
    pub fn starting_place(&self) -> Option<(&KeyLocation, &Place)> {
        let region = self.key_locations.first()?;
        let place = region.subareas.first()?;
        Some((region, place))
    }

    /// Region and subarea names, in outline order.
    pub fn place_names(&self) -> Vec<&str> {
        self.key_locations
            .iter()
            .flat_map(|r| {
                std::iter::once(r.name.as_str()).chain(r.subareas.iter().map(|s| s.name.as_str()))
            })
            .collect()
    }

    /// Opening sentence of the player's origin story.
    pub fn backstory_summary(&self) -> &str {
        let story = self.player_backstory.origin_story.trim();
        match story.find(['.', '!', '?']) {
            Some(end) => &story[..=end],
            None => story,
        }
    }

    /// Cross-reference checks the shape cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen_ids = BTreeSet::new();
        for (i, npc) in self.npcs.iter().enumerate() {
            if !seen_ids.insert(npc.id.as_str()) {
                return Err(ValidationError::new(
                    format!("$.npcs[{i}].id"),
                    format!("duplicate npc id '{}'", npc.id),
                ));
            }
        }

        let mut seen_places = BTreeSet::new();
        for name in self.place_names() {
            if !seen_places.insert(name) {
                return Err(ValidationError::new(
                    "$.key_locations",
                    format!("place name '{name}' is used twice"),
                ));
            }
        }

        for (i, act) in self.five_act_plan.iter().enumerate() {
            if self.npc(&act.tie_npc).is_none() {
                return Err(ValidationError::new(
                    format!("$.five_act_plan[{i}].tie_npc"),
                    format!("unknown npc '{}'", act.tie_npc),
                ));
            }
            if self.mystery(&act.tied_mystery).is_none() {
                return Err(ValidationError::new(
                    format!("$.five_act_plan[{i}].tied_mystery"),
                    format!("unknown mystery '{}'", act.tied_mystery),
                ));
            }
        }
        Ok(())
    }
}

/// The pre-authored outline used for "default" games and as the fallback.
pub fn default_outline() -> NarrativeOutline {
    DEFAULT_OUTLINE.clone()
}

/// Expected shape of a generated outline.
pub fn premise_shape() -> Shape {
    let named_text = || {
        Shape::record(vec![
            Field::required("name", Shape::text()),
            Field::required("description", Shape::text()),
        ])
    };
    let trait_score = || Shape::integer(1, 10, 1);

    Shape::record(vec![
        Field::required("world_name", Shape::text()),
        Field::required("world_overview", Shape::text()),
        Field::required(
            "key_locations",
            Shape::exactly(
                Shape::record(vec![
                    Field::required("name", Shape::text()),
                    Field::required("subareas", Shape::list(named_text(), 1, 4)),
                ]),
                5,
            ),
        ),
        Field::required("factions", Shape::list(named_text(), 3, 5)),
        Field::required(
            "mysteries",
            Shape::exactly(
                Shape::record(vec![
                    Field::required("id", Shape::one_of(["m1", "m2", "m3", "m4"])),
                    Field::required("prompt", Shape::text()),
                    Field::required("answer", Shape::text()),
                    Field::required("twist", Shape::text()),
                ]),
                4,
            ),
        ),
        Field::required(
            "npcs",
            Shape::list(
                Shape::record(vec![
                    Field::required(
                        "id",
                        Shape::one_of(["npc1", "npc2", "npc3", "npc4", "npc5", "npc6"]),
                    ),
                    Field::required("name", Shape::text()),
                    Field::required("role", Shape::text()),
                    Field::required("description", Shape::text()),
                    Field::required("goal", Shape::text()),
                    Field::required("visual_description", Shape::text()),
                ]),
                5,
                6,
            ),
        ),
        Field::required(
            "player_backstory",
            Shape::record(vec![
                Field::required("name", Shape::text()),
                Field::required("origin_story", Shape::text()),
                Field::required(
                    "starting_traits",
                    Shape::record(vec![
                        Field::required("bravery", trait_score()),
                        Field::required("curiosity", trait_score()),
                        Field::required("empathy", trait_score()),
                        Field::required("communication", trait_score()),
                        Field::required("trust", trait_score()),
                    ]),
                ),
                Field::optional("starting_locations", Shape::list(Shape::text(), 0, 8)),
            ]),
        ),
        Field::required(
            "five_act_plan",
            Shape::exactly(
                Shape::record(vec![
                    Field::required("title", Shape::text()),
                    Field::required("inciting_incident", Shape::text()),
                    Field::required("tied_mystery", Shape::text()),
                    Field::required("tie_npc", Shape::text()),
                    Field::required("twist", Shape::text()),
                    Field::required("scenes_count", Shape::integer(12, 35, 12)),
                ]),
                5,
            ),
        ),
    ])
}

/// Generate a fresh outline for `genre`, falling back to the default outline.
pub async fn generate_premise(
    generator: &StructuredGenerator,
    genre: &str,
) -> Generated<NarrativeOutline> {
    let prompt = Prompt::new(
        PURPOSE,
        format!(
            "I need a richly detailed, immersive {genre} world for a branching visual novel. \
             Follow the required counts exactly."
        ),
    )
    .with_system(include_str!("prompts/premise.txt"))
    .with_max_tokens(8000)
    .with_temperature(0.8);

    let outline = generator
        .generate_checked(&prompt, &premise_shape(), NarrativeOutline::validate, default_outline())
        .await;

    if outline.is_fallback() {
        tracing::warn!(genre, "Using default premise");
    } else {
        tracing::info!(world = %outline.value.world_name, "Generated premise");
    }
    outline
}
