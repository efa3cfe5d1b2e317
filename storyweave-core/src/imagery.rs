//! Character portraits and scene illustrations.
//!
//! Images are written as PNG files under the configured directories. Image
//! generation failures are never fatal; the caller just gets no image.

use crate::backend::{ImageSize, Prompt};
use crate::error::{PersistError, ValidationError};
use crate::generator::StructuredGenerator;
use crate::state::GameState;
use crate::store::highest_numbered;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const PORTRAIT_PURPOSE: &str = "portrait";
pub const SCENE_PROMPT_PURPOSE: &str = "image_prompt";
pub const SCENE_IMAGE_PURPOSE: &str = "scene_image";

/// Scene text used directly as an image prompt is cut to this many chars.
const RAW_PROMPT_LIMIT: usize = 900;

/// A character to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortraitSubject {
    pub name: String,
    pub description: String,
    pub visual_description: String,
}

/// File-name form of a character name. Only `[a-z0-9_-]` survives, so the
/// result never leaves the portrait directory.
pub fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

pub fn portrait_prompt(subject: &PortraitSubject, genre: &str, artstyle: &str) -> String {
    let look = if subject.visual_description.trim().is_empty() {
        subject.description.as_str()
    } else {
        subject.visual_description.as_str()
    };
    format!(
        "A head-and-shoulders portrait bust of {}, {look}. \
         Centered, facing the viewer, plain background. {artstyle} style, {genre} setting. \
         No text or lettering.",
        subject.name
    )
}

/// Everyone who should have a portrait once a companion is chosen.
pub fn portrait_subjects(state: &GameState) -> Vec<PortraitSubject> {
    let mut subjects = Vec::new();
    if let Some(outline) = &state.outline {
        let player = &outline.player_backstory;
        subjects.push(PortraitSubject {
            name: player.name.clone(),
            description: outline.backstory_summary().to_string(),
            visual_description: String::new(),
        });
    }
    if let Some(companion) = &state.companion {
        subjects.push(PortraitSubject {
            name: companion.name.clone(),
            description: companion.description.clone(),
            visual_description: companion.visual_description.clone(),
        });
    }
    if let Some(outline) = &state.outline {
        subjects.extend(outline.npcs.iter().map(|npc| PortraitSubject {
            name: npc.name.clone(),
            description: npc.description.clone(),
            visual_description: npc.visual_description.clone(),
        }));
    }
    subjects
}

/// Draw and save one portrait. Returns the file written.
pub async fn generate_portrait(
    generator: &StructuredGenerator,
    dir: &Path,
    subject: &PortraitSubject,
    genre: &str,
    artstyle: &str,
) -> Option<PathBuf> {
    let prompt = portrait_prompt(subject, genre, artstyle);
    let bytes = generator
        .generate_image(PORTRAIT_PURPOSE, &prompt, ImageSize::SQUARE)
        .await?;

    let path = dir.join(format!("{}.png", slug(&subject.name)));
    match write_image(&path, &bytes).await {
        Ok(()) => {
            tracing::debug!(name = %subject.name, path = %path.display(), "Saved portrait");
            Some(path)
        }
        Err(e) => {
            tracing::error!(name = %subject.name, error = %e, "Failed to save portrait");
            None
        }
    }
}

/// Draw portraits for every subject at once, one in-flight request per
/// subject. Subjects whose image failed are missing from the result.
pub async fn generate_portraits(
    generator: &StructuredGenerator,
    dir: &Path,
    subjects: &[PortraitSubject],
    genre: &str,
    artstyle: &str,
) -> BTreeMap<String, PathBuf> {
    let results: Vec<(String, Option<PathBuf>)> = stream::iter(subjects)
        .map(|subject| async move {
            let path = generate_portrait(generator, dir, subject, genre, artstyle).await;
            (subject.name.clone(), path)
        })
        .buffer_unordered(subjects.len().max(1))
        .collect()
        .await;

    let portraits: BTreeMap<String, PathBuf> = results
        .into_iter()
        .filter_map(|(name, path)| path.map(|p| (name, p)))
        .collect();
    if portraits.len() < subjects.len() {
        tracing::warn!(
            requested = subjects.len(),
            drawn = portraits.len(),
            "Some portraits could not be generated"
        );
    }
    portraits
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(str::to_lowercase)
        .collect()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Turn scene text into an image prompt. The rewrite must share vocabulary
/// with the scene, otherwise the scene text itself is used.
pub async fn scene_image_prompt(generator: &StructuredGenerator, state: &GameState, scene: &str) -> String {
    let genre = state.genre.as_deref().unwrap_or("fantasy");
    let artstyle = state.artstyle.as_deref().unwrap_or("painterly");
    let user = format!("Genre: {genre}\nArt style: {artstyle}\n\nScene:\n{scene}");
    let prompt = Prompt::new(SCENE_PROMPT_PURPOSE, user)
        .with_system(include_str!("prompts/image_prompt.txt"))
        .with_max_tokens(300)
        .with_temperature(0.4);

    let scene_words = words(scene);
    let accept = |text: &str| {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::new("$", "empty image prompt"));
        }
        if words(text).is_disjoint(&scene_words) {
            return Err(ValidationError::new("$", "image prompt unrelated to scene"));
        }
        Ok(text.to_string())
    };

    let fallback = format!("{artstyle} {genre} illustration: {}", truncate_chars(scene, RAW_PROMPT_LIMIT));
    generator.generate_text(&prompt, accept, fallback).await.into_value()
}

/// Illustrate a scene and save it as the next numbered file.
pub async fn generate_scene_image(
    generator: &StructuredGenerator,
    dir: &Path,
    state: &GameState,
    scene: &str,
) -> Option<PathBuf> {
    let prompt = scene_image_prompt(generator, state, scene).await;
    let bytes = generator
        .generate_image(SCENE_IMAGE_PURPOSE, &prompt, ImageSize::LANDSCAPE)
        .await?;

    match save_numbered(dir, &bytes).await {
        Ok(path) => {
            tracing::info!(path = %path.display(), "Saved scene image");
            Some(path)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to save scene image");
            None
        }
    }
}

async fn save_numbered(dir: &Path, bytes: &[u8]) -> Result<PathBuf, PersistError> {
    let next = highest_numbered(dir, "").await?.map_or(1, |n| n + 1);
    let path = dir.join(format!("{next}.png"));
    write_image(&path, bytes).await?;
    Ok(path)
}

async fn write_image(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(path, bytes).await?;
    Ok(())
}
