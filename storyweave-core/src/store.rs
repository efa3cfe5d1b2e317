//! Save/load of the game state document and archival of old playthroughs.
//!
//! The save is one pretty-printed JSON document, overwritten whole on every
//! save. Writes go to a sibling temp file first and are renamed into place.

use crate::config::StoragePaths;
use crate::error::PersistError;
use crate::state::{GameState, SAVE_VERSION};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Reads and writes the game state and owns the artifact directories.
#[derive(Debug, Clone)]
pub struct GameStore {
    paths: StoragePaths,
}

impl GameStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Whether a save document exists.
    pub fn exists(&self) -> bool {
        self.paths.save_file.is_file()
    }

    /// Whether the save document exists and parses, i.e. whether
    /// [`GameStore::load`] would return a state.
    pub fn is_loadable(&self) -> bool {
        std::fs::read_to_string(&self.paths.save_file)
            .ok()
            .is_some_and(|content| serde_json::from_str::<GameState>(&content).is_ok())
    }

    /// Load the saved state. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<GameState>, PersistError> {
        let content = match fs::read_to_string(&self.paths.save_file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: GameState = serde_json::from_str(&content)?;
        if state.version != SAVE_VERSION {
            tracing::warn!(
                found = state.version,
                expected = SAVE_VERSION,
                "Save version differs; loading field by field"
            );
        }
        Ok(Some(state))
    }

    /// Load, treating an unreadable or corrupt save as no save.
    pub async fn load_or_none(&self) -> Option<GameState> {
        match self.load().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(
                    path = %self.paths.save_file.display(),
                    error = %e,
                    "Failed to load save; starting fresh"
                );
                None
            }
        }
    }

    /// Write the whole document.
    pub async fn save(&self, state: &GameState) -> Result<(), PersistError> {
        let path = &self.paths.save_file;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Move the save and generated images into `archive/saveN/`, where N is
    /// one past the highest existing archive number. Returns the archive
    /// folder, or `None` when there was nothing to archive.
    pub async fn archive(&self) -> Result<Option<PathBuf>, PersistError> {
        let has_save = self.exists();
        let has_portraits = has_entries(&self.paths.portraits_dir).await?;
        let has_scenes = has_entries(&self.paths.scene_images_dir).await?;
        if !has_save && !has_portraits && !has_scenes {
            return Ok(None);
        }

        let next = highest_numbered(&self.paths.archive_dir, "save").await?.map_or(1, |n| n + 1);
        let target = self.paths.archive_dir.join(format!("save{next}"));
        let story_dir = target.join("story");
        let images_dir = target.join("images");
        fs::create_dir_all(&story_dir).await?;
        fs::create_dir_all(&images_dir).await?;

        if has_save {
            let name = self
                .paths
                .save_file
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("game_state.json"));
            fs::rename(&self.paths.save_file, story_dir.join(name)).await?;
        }
        if has_portraits {
            fs::rename(&self.paths.portraits_dir, images_dir.join("character_portraits")).await?;
        }
        if has_scenes {
            fs::rename(&self.paths.scene_images_dir, images_dir.join("generated_images")).await?;
        }

        tracing::info!(archive = %target.display(), "Archived previous game");
        Ok(Some(target))
    }
}

/// Whether `dir` exists and contains anything.
async fn has_entries(dir: &Path) -> Result<bool, PersistError> {
    match fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Highest N among entries of `dir` named `{prefix}{N}` (or `{prefix}{N}.ext`).
pub(crate) async fn highest_numbered(dir: &Path, prefix: &str) -> Result<Option<u32>, PersistError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut highest = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(n) = stem.strip_prefix(prefix).and_then(|rest| rest.parse::<u32>().ok()) {
            highest = highest.max(Some(n));
        }
    }
    Ok(highest)
}
