//! Scene generation: context assembly, output parsing and the stall fallback.

use crate::backend::Prompt;
use crate::error::ValidationError;
use crate::generator::{Generated, StructuredGenerator};
use crate::state::GameState;
use std::collections::HashMap;
use std::fmt::Write as _;

pub const PURPOSE: &str = "scene";

/// Choices offered after every scene.
pub const CHOICE_COUNT: usize = 3;

const CHOICE_PAD: &str = "Continue cautiously.";
const FALLBACK_TEXT: &str = "The story stalls for a moment as you consider your next move.";
const FALLBACK_CHOICES: [&str; CHOICE_COUNT] = [
    "Continue cautiously and observe.",
    "Take a bold action.",
    "Reflect silently.",
];

lazy_static::lazy_static! {
    static ref FIRST_CHOICE: regex_lite::Regex =
        regex_lite::Regex::new(r"^\s*1\.\s+").expect("valid regex");
    static ref CHOICE_LINE: regex_lite::Regex =
        regex_lite::Regex::new(r"^\s*(\d+)\.\s*(.+)$").expect("valid regex");
    static ref DIALOGUE_LINE: regex_lite::Regex =
        regex_lite::Regex::new(r#"^([^:]+):\s*"(.*)"$"#).expect("valid regex");
}

/// A scene and the choices offered after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub text: String,
    pub choices: Vec<String>,
}

/// Shown when scene generation fails.
pub fn fallback_scene() -> Scene {
    Scene {
        text: FALLBACK_TEXT.to_string(),
        choices: FALLBACK_CHOICES.iter().map(|c| c.to_string()).collect(),
    }
}

/// Split model output into scene text (everything before the `1.` line)
/// and up to three numbered choices, padded to three.
pub fn parse_scene(raw: &str) -> Result<Scene, ValidationError> {
    let lines: Vec<&str> = raw.lines().collect();
    let split = lines
        .iter()
        .position(|l| FIRST_CHOICE.is_match(l))
        .unwrap_or(lines.len());

    let text = lines[..split]
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(ValidationError::new("$.scene", "scene text is empty"));
    }

    let mut choices: Vec<String> = lines[split..]
        .iter()
        .filter_map(|l| CHOICE_LINE.captures(l))
        .filter(|caps| {
            caps.get(1)
                .and_then(|n| n.as_str().parse::<usize>().ok())
                .is_some_and(|n| (1..=CHOICE_COUNT).contains(&n))
        })
        .filter_map(|caps| caps.get(2).map(|m| m.as_str().trim().to_string()))
        .filter(|c| !c.is_empty())
        .take(CHOICE_COUNT)
        .collect();
    while choices.len() < CHOICE_COUNT {
        choices.push(CHOICE_PAD.to_string());
    }

    Ok(Scene { text, choices })
}

/// Rewrite `speaker: "..."` lines so known speakers use their canonical
/// spelling. Unknown speakers are left alone.
pub fn normalize_dialogue_names<'a>(
    text: &str,
    known: impl IntoIterator<Item = &'a str>,
) -> String {
    let lookup: HashMap<String, &str> = known
        .into_iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| (n.trim().to_lowercase(), n.trim()))
        .collect();

    text.lines()
        .map(|line| {
            let Some(caps) = DIALOGUE_LINE.captures(line) else {
                return line.to_string();
            };
            let (Some(speaker), Some(words)) = (caps.get(1), caps.get(2)) else {
                return line.to_string();
            };
            match lookup.get(&speaker.as_str().trim().to_lowercase()) {
                Some(canonical) => format!("{canonical}: \"{}\"", words.as_str()),
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Names that may appear as dialogue speakers.
fn known_speakers(state: &GameState) -> Vec<&str> {
    let mut names = Vec::new();
    if let Some(outline) = &state.outline {
        names.push(outline.player_backstory.name.as_str());
        names.extend(outline.npcs.iter().map(|n| n.name.as_str()));
    }
    if let Some(companion) = &state.companion {
        names.push(companion.name.as_str());
    }
    names
}

/// Assemble everything the narrator needs to write the next scene.
pub fn scene_context(state: &GameState, choice: Option<&str>) -> String {
    let mut out = String::new();
    let genre = state.genre.as_deref().unwrap_or("fantasy").to_uppercase();
    let Some(outline) = &state.outline else {
        let _ = writeln!(out, "INTERACTIVE {genre}");
        if let Some(choice) = choice {
            let _ = writeln!(out, "The player chose: '{choice}'.");
        }
        return out;
    };

    let act_index = state.acts.current;
    let act = outline.five_act_plan.get(act_index);
    let _ = writeln!(
        out,
        "INTERACTIVE {genre}: ACT {}/{}: \"{}\"",
        act_index + 1,
        outline.five_act_plan.len(),
        state.acts.current_title().unwrap_or_default()
    );
    if let Some(act) = act {
        let _ = writeln!(out, "Inciting incident: {}", act.inciting_incident);
        if let Some(mystery) = outline.mystery(&act.tied_mystery) {
            let _ = writeln!(
                out,
                "Tied mystery: {} (Answer: {}; Twist: {})",
                mystery.prompt, mystery.answer, mystery.twist
            );
        }
    }

    let all_npcs: Vec<&str> = outline.npcs.iter().map(|n| n.name.as_str()).collect();
    let present: Vec<&str> = state.party.iter().filter_map(|id| state.npc_name(id)).collect();
    let _ = writeln!(out, "All NPCs: {}.", all_npcs.join(", "));
    let _ = writeln!(
        out,
        "Present with you: {}.\n",
        if present.is_empty() {
            "None".to_string()
        } else {
            present.join(", ")
        }
    );

    if !state.recent_scenes.is_empty() {
        let recent: Vec<&str> = state.recent_scenes.iter().collect();
        let _ = writeln!(out, "Recent scenes:\n{}\n", recent.join("\n\n"));
    }

    let traits = outline.player_backstory.starting_traits;
    let _ = writeln!(
        out,
        "{}'s origin: {} Starting traits: bravery {}, curiosity {}, empathy {}, communication {}, trust {}.\n",
        outline.player_backstory.name,
        outline.backstory_summary(),
        traits.bravery,
        traits.curiosity,
        traits.empathy,
        traits.communication,
        traits.trust,
    );

    let factions: Vec<String> = outline
        .factions
        .iter()
        .map(|f| format!("{} ({})", f.name, f.description))
        .collect();
    let _ = writeln!(out, "World overview: {}", outline.world_overview);
    let _ = writeln!(out, "Factions: {}.\n", factions.join("; "));

    if let Some(loc) = &state.current_location {
        let _ = writeln!(
            out,
            "Location: {} (subarea of {})\nDescription: {}\n",
            loc.subarea, loc.region, loc.description
        );
    }

    if !state.last_scene_choices.is_empty() {
        let _ = writeln!(out, "The player's previous options:");
        for (i, c) in state.last_scene_choices.iter().enumerate() {
            let _ = writeln!(out, "{}. {c}", i + 1);
        }
        out.push('\n');
    }
    if let Some(choice) = choice {
        let _ = writeln!(out, "The player chose: '{choice}'.\n");
    }

    let _ = writeln!(out, "Player profile: {}", state.player_profile.describe());
    if let Some(companion) = &state.companion {
        let _ = writeln!(
            out,
            "Companion: {} - {}. Feelings toward the player: {}.",
            companion.name,
            companion.description,
            state.companion_profile.describe()
        );
    }
    out
}

/// Generate the next scene, continuing from `choice` if one was made.
pub async fn generate_scene(
    generator: &StructuredGenerator,
    state: &GameState,
    choice: Option<&str>,
) -> Generated<Scene> {
    let prompt = Prompt::new(PURPOSE, scene_context(state, choice))
        .with_system(include_str!("prompts/scene.txt"))
        .with_max_tokens(1500)
        .with_temperature(0.75);

    let known = known_speakers(state);
    let accept = |raw: &str| {
        let mut scene = parse_scene(raw)?;
        scene.text = normalize_dialogue_names(&scene.text, known.iter().copied());
        Ok(scene)
    };

    let scene = generator.generate_text(&prompt, accept, fallback_scene()).await;
    if scene.is_fallback() {
        tracing::warn!("Scene generation failed; story stalls");
    }
    scene
}
