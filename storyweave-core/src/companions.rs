//! Companion candidates offered at the start of a game.

use crate::backend::Prompt;
use crate::generator::{Generated, StructuredGenerator};
use crate::shape::{Field, Shape};
use crate::state::{Companion, CompanionProfile, GameState};

pub const PURPOSE: &str = "companions";

/// Candidates offered per game.
pub const CANDIDATE_COUNT: usize = 3;

/// Companions offered when generation fails.
pub fn fallback_roster() -> Vec<Companion> {
    vec![
        Companion {
            name: "Wary Swordsman".into(),
            description: "A battle-scarred warrior who trusts few but fights loyally.".into(),
            visual_description: "A tall, heavily muscled human male with a buzzcut and numerous scars crisscrossing his arms, wearing dented chainmail.".into(),
            traits: CompanionProfile {
                trust: 5.0,
                fear: 2.0,
                affection: 3.0,
            },
        },
        Companion {
            name: "Stoic Mage".into(),
            description: "A quiet spellcaster whose calm presence soothes the uneasy.".into(),
            visual_description: "A slender elf with pale skin, silver hair tied in a braid, and glowing emerald runes on her robes.".into(),
            traits: CompanionProfile {
                trust: 4.0,
                fear: 1.0,
                affection: 4.0,
            },
        },
        Companion {
            name: "Cheerful Rogue".into(),
            description: "A nimble trickster with a heart of gold and a quick smile.".into(),
            visual_description: "A short halfling with curly auburn hair, bright green eyes, and a patchwork leather jacket full of hidden pockets.".into(),
            traits: CompanionProfile {
                trust: 3.0,
                fear: 3.0,
                affection: 5.0,
            },
        },
    ]
}

pub fn companion_shape() -> Shape {
    let score = || Shape::number(0.0, 10.0, 5.0);
    Shape::exactly(
        Shape::record(vec![
            Field::required("name", Shape::text()),
            Field::required("description", Shape::text()),
            Field::required("visual_description", Shape::text()),
            Field::required(
                "traits",
                Shape::record(vec![
                    Field::required("trust", score()),
                    Field::required("fear", score()),
                    Field::required("affection", score()),
                ]),
            ),
        ]),
        CANDIDATE_COUNT,
    )
}

/// Generate three companion candidates suited to the current world.
pub async fn generate_companions(
    generator: &StructuredGenerator,
    state: &GameState,
) -> Generated<Vec<Companion>> {
    let genre = state.genre.as_deref().unwrap_or("fantasy");
    let world = state
        .outline
        .as_ref()
        .map(|o| format!("{}: {}", o.world_name, o.world_overview))
        .unwrap_or_default();
    let player = state
        .outline
        .as_ref()
        .map(|o| o.backstory_summary().to_string())
        .unwrap_or_default();

    let user = format!(
        "Genre: {genre}\nWorld: {world}\nThe player: {player}\n\n\
         Create {CANDIDATE_COUNT} distinct companions who could travel with the player."
    );
    let prompt = Prompt::new(PURPOSE, user)
        .with_system(include_str!("prompts/companions.txt"))
        .with_max_tokens(1500)
        .with_temperature(0.9);

    let companions = generator
        .generate(&prompt, &companion_shape(), fallback_roster())
        .await;
    if companions.is_fallback() {
        tracing::warn!("Using fallback companion roster");
    }
    companions
}
