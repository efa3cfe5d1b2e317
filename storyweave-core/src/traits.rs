//! Trait inference from player choices.
//!
//! The model proposes small per-trait shifts; this module canonicalizes trait
//! names, bounds each shift, and applies shifts to the player's personality
//! and to the companion's feelings about the player.

use crate::backend::Prompt;
use crate::generator::StructuredGenerator;
use crate::shape::Shape;
use crate::state::{CompanionProfile, GameState, PlayerProfile, TRAIT_MAX, TRAIT_MIN};
use serde_json::{Map as JsonMap, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const PLAYER_PURPOSE: &str = "player_traits";
pub const COMPANION_PURPOSE: &str = "companion_traits";
pub const ANALYSIS_PURPOSE: &str = "personality_analysis";

/// Largest shift a single choice can make to a player trait.
pub const PLAYER_DELTA_LIMIT: f64 = 0.5;

/// Largest shift a single choice can make to a companion trait.
pub const COMPANION_DELTA_LIMIT: f64 = 0.5;

// ============================================================================
// Trait names
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerTrait {
    Bravery,
    Curiosity,
    Empathy,
    Communication,
    Trust,
}

impl PlayerTrait {
    pub const ALL: [PlayerTrait; 5] = [
        PlayerTrait::Bravery,
        PlayerTrait::Curiosity,
        PlayerTrait::Empathy,
        PlayerTrait::Communication,
        PlayerTrait::Trust,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PlayerTrait::Bravery => "bravery",
            PlayerTrait::Curiosity => "curiosity",
            PlayerTrait::Empathy => "empathy",
            PlayerTrait::Communication => "communication",
            PlayerTrait::Trust => "trust",
        }
    }

    /// Map a model-supplied name (any case, known synonyms) to a trait.
    pub fn canonical(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "bravery" | "courage" | "valor" | "valour" => Some(PlayerTrait::Bravery),
            "curiosity" | "inquisitiveness" => Some(PlayerTrait::Curiosity),
            "empathy" | "compassion" => Some(PlayerTrait::Empathy),
            "communication" | "charisma" => Some(PlayerTrait::Communication),
            "trust" | "honesty" => Some(PlayerTrait::Trust),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompanionTrait {
    Trust,
    Fear,
    Affection,
}

impl CompanionTrait {
    pub const ALL: [CompanionTrait; 3] = [
        CompanionTrait::Trust,
        CompanionTrait::Fear,
        CompanionTrait::Affection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CompanionTrait::Trust => "trust",
            CompanionTrait::Fear => "fear",
            CompanionTrait::Affection => "affection",
        }
    }

    pub fn canonical(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "trust" | "loyalty" => Some(CompanionTrait::Trust),
            "fear" | "dread" | "anxiety" => Some(CompanionTrait::Fear),
            "affection" | "love" | "fondness" => Some(CompanionTrait::Affection),
            _ => None,
        }
    }
}

impl fmt::Display for CompanionTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PlayerProfile {
    pub fn get(&self, t: PlayerTrait) -> f64 {
        match t {
            PlayerTrait::Bravery => self.bravery,
            PlayerTrait::Curiosity => self.curiosity,
            PlayerTrait::Empathy => self.empathy,
            PlayerTrait::Communication => self.communication,
            PlayerTrait::Trust => self.trust,
        }
    }

    fn slot(&mut self, t: PlayerTrait) -> &mut f64 {
        match t {
            PlayerTrait::Bravery => &mut self.bravery,
            PlayerTrait::Curiosity => &mut self.curiosity,
            PlayerTrait::Empathy => &mut self.empathy,
            PlayerTrait::Communication => &mut self.communication,
            PlayerTrait::Trust => &mut self.trust,
        }
    }

    /// Apply bounded shifts, keeping every trait in range.
    pub fn apply(&mut self, deltas: &PlayerDeltas) {
        for (&t, &delta) in deltas {
            let slot = self.slot(t);
            *slot = apply_delta(*slot, delta);
        }
    }

    /// `bravery: 5.5, curiosity: 7.0, ...`
    pub fn describe(&self) -> String {
        PlayerTrait::ALL
            .iter()
            .map(|&t| format!("{t}: {:.1}", self.get(t)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl CompanionProfile {
    pub fn get(&self, t: CompanionTrait) -> f64 {
        match t {
            CompanionTrait::Trust => self.trust,
            CompanionTrait::Fear => self.fear,
            CompanionTrait::Affection => self.affection,
        }
    }

    fn slot(&mut self, t: CompanionTrait) -> &mut f64 {
        match t {
            CompanionTrait::Trust => &mut self.trust,
            CompanionTrait::Fear => &mut self.fear,
            CompanionTrait::Affection => &mut self.affection,
        }
    }

    pub fn apply(&mut self, deltas: &CompanionDeltas) {
        for (&t, &delta) in deltas {
            let slot = self.slot(t);
            *slot = apply_delta(*slot, delta);
        }
    }

    pub fn describe(&self) -> String {
        CompanionTrait::ALL
            .iter()
            .map(|&t| format!("{t}: {:.1}", self.get(t)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// Deltas
// ============================================================================

pub type PlayerDeltas = BTreeMap<PlayerTrait, f64>;
pub type CompanionDeltas = BTreeMap<CompanionTrait, f64>;

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Bound a proposed shift to `±limit` and round to one decimal.
/// Non-finite values become 0.
pub fn normalize_delta(raw: f64, limit: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    round1(raw.clamp(-limit, limit))
}

/// `round1(clamp(old + delta, 0, 10))`
pub fn apply_delta(old: f64, delta: f64) -> f64 {
    round1((old + delta).clamp(TRAIT_MIN, TRAIT_MAX))
}

fn delta_value(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Canonicalize a raw `{name: delta}` object into player deltas. Unknown
/// names are ignored; synonyms of one trait are summed before bounding.
pub fn player_deltas_from(raw: &JsonMap<String, Value>) -> PlayerDeltas {
    let mut sums: PlayerDeltas = BTreeMap::new();
    for (name, value) in raw {
        match PlayerTrait::canonical(name) {
            Some(t) => *sums.entry(t).or_default() += delta_value(value),
            None => tracing::debug!(name = %name, "Ignored unknown player trait"),
        }
    }
    sums.into_iter()
        .map(|(t, d)| (t, normalize_delta(d, PLAYER_DELTA_LIMIT)))
        .collect()
}

pub fn companion_deltas_from(raw: &JsonMap<String, Value>) -> CompanionDeltas {
    let mut sums: CompanionDeltas = BTreeMap::new();
    for (name, value) in raw {
        match CompanionTrait::canonical(name) {
            Some(t) => *sums.entry(t).or_default() += delta_value(value),
            None => tracing::debug!(name = %name, "Ignored unknown companion trait"),
        }
    }
    sums.into_iter()
        .map(|(t, d)| (t, normalize_delta(d, COMPANION_DELTA_LIMIT)))
        .collect()
}

fn delta_shape(limit: f64) -> Shape {
    Shape::map(Shape::number(-limit, limit, 0.0))
}

async fn request_deltas(
    generator: &StructuredGenerator,
    prompt: Prompt,
    limit: f64,
) -> JsonMap<String, Value> {
    generator
        .generate(&prompt, &delta_shape(limit), JsonMap::new())
        .await
        .into_value()
}

// ============================================================================
// Inference
// ============================================================================

/// Ask how a choice shifts the player's personality.
pub async fn infer_player_deltas(
    generator: &StructuredGenerator,
    scene: &str,
    choice: &str,
) -> PlayerDeltas {
    let names: Vec<&str> = PlayerTrait::ALL.iter().map(|t| t.name()).collect();
    let user = format!(
        "Scene:\n{scene}\n\nPlayer choice: \"{choice}\"\n\n\
         Map any of these traits to a shift between -{PLAYER_DELTA_LIMIT} and {PLAYER_DELTA_LIMIT}, \
         one decimal place: {}",
        names.join(", ")
    );
    let prompt = Prompt::new(PLAYER_PURPOSE, user)
        .with_system(include_str!("prompts/profiling.txt"))
        .with_max_tokens(200)
        .with_temperature(0.5);

    player_deltas_from(&request_deltas(generator, prompt, PLAYER_DELTA_LIMIT).await)
}

/// Ask how a choice shifts the companion's feelings toward the player.
pub async fn infer_companion_deltas(
    generator: &StructuredGenerator,
    state: &GameState,
    scene: &str,
    choice: &str,
) -> CompanionDeltas {
    let Some(companion) = &state.companion else {
        return CompanionDeltas::new();
    };
    let user = format!(
        "Companion: {} - {}\nCurrent feelings toward the player: {}\n\n\
         Scene:\n{scene}\n\nPlayer choice: \"{choice}\"\n\n\
         Map trust, fear and affection to how this choice shifts the companion's feelings, \
         each between -{COMPANION_DELTA_LIMIT} and {COMPANION_DELTA_LIMIT}, one decimal place.",
        companion.name,
        companion.description,
        state.companion_profile.describe(),
    );
    let prompt = Prompt::new(COMPANION_PURPOSE, user)
        .with_system(include_str!("prompts/profiling.txt"))
        .with_max_tokens(150)
        .with_temperature(0.5);

    companion_deltas_from(&request_deltas(generator, prompt, COMPANION_DELTA_LIMIT).await)
}

/// Ask for an updated personality analysis. `None` means keep the old one.
pub async fn infer_personality_analysis(
    generator: &StructuredGenerator,
    state: &GameState,
    scene: &str,
    choice: &str,
    updated: &PlayerProfile,
) -> Option<String> {
    let previous = if state.personality_analysis.is_empty() {
        "(none yet)"
    } else {
        state.personality_analysis.as_str()
    };
    let user = format!(
        "Previous profile: {}\nPrevious analysis: {previous}\n\
         Scene:\n{scene}\n\nPlayer choice: \"{choice}\"\nUpdated profile: {}\n\n\
         Write a concise personality analysis of the player character, under 100 words, \
         building on the previous analysis and the trait shifts. Output only the analysis.",
        state.player_profile.describe(),
        updated.describe(),
    );
    let prompt = Prompt::new(ANALYSIS_PURPOSE, user)
        .with_system("You are an expert in character psychology. Build on the prior analysis.")
        .with_max_tokens(200)
        .with_temperature(0.7);

    let accept = |text: &str| {
        let text = text.trim();
        if text.is_empty() {
            Err(crate::error::ValidationError::new("$", "empty analysis"))
        } else {
            Ok(Some(text.to_string()))
        }
    };

    generator.generate_text(&prompt, accept, None).await.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::testing::MockBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn object(v: Value) -> JsonMap<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(PlayerTrait::canonical(" Courage "), Some(PlayerTrait::Bravery));
        assert_eq!(PlayerTrait::canonical("EMPATHY"), Some(PlayerTrait::Empathy));
        assert_eq!(PlayerTrait::canonical("luck"), None);
        assert_eq!(CompanionTrait::canonical("Love"), Some(CompanionTrait::Affection));
        assert_eq!(CompanionTrait::canonical("dread"), Some(CompanionTrait::Fear));
    }

    #[test]
    fn test_normalize_delta() {
        assert_eq!(normalize_delta(0.34, 0.5), 0.3);
        assert_eq!(normalize_delta(-0.36, 0.5), -0.4);
        assert_eq!(normalize_delta(2.0, 0.5), 0.5);
        assert_eq!(normalize_delta(-9.0, 0.5), -0.5);
        assert_eq!(normalize_delta(f64::NAN, 0.5), 0.0);
    }

    #[test]
    fn test_apply_delta_bounds() {
        assert_eq!(apply_delta(9.8, 0.5), 10.0);
        assert_eq!(apply_delta(0.2, -0.5), 0.0);
        assert_eq!(apply_delta(5.0, 0.3), 5.3);
    }

    #[test]
    fn test_player_deltas_from_raw() {
        let deltas = player_deltas_from(&object(json!({
            "Courage": 0.9,
            "curiosity": "0.24",
            "empathy": "lots",
            "luck": 0.5,
        })));
        assert_eq!(deltas.get(&PlayerTrait::Bravery), Some(&0.5));
        assert_eq!(deltas.get(&PlayerTrait::Curiosity), Some(&0.2));
        assert_eq!(deltas.get(&PlayerTrait::Empathy), Some(&0.0));
        assert_eq!(deltas.len(), 3);
    }

    #[test]
    fn test_profile_stays_in_bounds_over_many_turns() {
        let mut profile = PlayerProfile::default();
        let up: PlayerDeltas = PlayerTrait::ALL.iter().map(|&t| (t, 0.5)).collect();
        for _ in 0..40 {
            profile.apply(&up);
        }
        for t in PlayerTrait::ALL {
            assert_eq!(profile.get(t), 10.0);
        }

        let mut companion = CompanionProfile::default();
        let down: CompanionDeltas = CompanionTrait::ALL.iter().map(|&t| (t, -0.5)).collect();
        for _ in 0..40 {
            companion.apply(&down);
        }
        assert_eq!(companion.fear, 0.0);
        assert_eq!(companion.trust, 0.0);
    }

    #[tokio::test]
    async fn test_infer_player_deltas_uses_fallback_on_failure() {
        let mock = Arc::new(MockBackend::new().on_structured_failure(PLAYER_PURPOSE));
        let generator = StructuredGenerator::new(mock.clone(), RetryPolicy::immediate(2));
        let deltas = infer_player_deltas(&generator, "scene", "Run").await;
        assert!(deltas.is_empty());
        assert_eq!(mock.structured_calls(), 2);
    }

    #[tokio::test]
    async fn test_analysis_failure_keeps_previous() {
        let mock = Arc::new(MockBackend::new().on_text(ANALYSIS_PURPOSE, "   "));
        let generator = StructuredGenerator::new(mock, RetryPolicy::immediate(2));
        let state = GameState::new();
        let out =
            infer_personality_analysis(&generator, &state, "scene", "Run", &state.player_profile)
                .await;
        assert!(out.is_none());
    }
}
