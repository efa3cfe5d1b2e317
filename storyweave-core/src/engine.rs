//! The orchestration facade - the primary public API for playing a story.
//!
//! [`Engine`] owns the configuration, the generator, the store and the game
//! state, and sequences the other modules through the turn loop:
//!
//! ```text
//! NeedPremise -> NeedCompanion -> InScene -> AwaitingChoice -> InScene ...
//! ```
//!
//! Every operation leaves the state consistent and persists it when it
//! changed. Save failures are logged and never interrupt play.

use crate::backend::{ClaudeBackend, GenerationBackend};
use crate::branch::NodeId;
use crate::companions::generate_companions;
use crate::config::EngineConfig;
use crate::continuity::{self, PartyChange};
use crate::error::EngineError;
use crate::generator::StructuredGenerator;
use crate::imagery;
use crate::premise::{default_outline, generate_premise, PremiseMode};
use crate::scene::generate_scene;
use crate::state::{Companion, GameState};
use crate::store::GameStore;
use crate::traits::{infer_companion_deltas, infer_personality_analysis, infer_player_deltas};
use std::path::PathBuf;
use std::sync::Arc;

/// Which step of the turn loop a game is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// No outline yet; start a new game or resume.
    NeedPremise,
    /// Outline ready; a companion must be selected.
    NeedCompanion,
    /// A scene needs to be produced (first scene, or a choice is pending).
    InScene,
    /// The current scene is shown and waits for a choice.
    AwaitingChoice,
}

/// What a choice did to the story.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceOutcome {
    /// Whether the text was one of the offered choices.
    pub offered: bool,
    /// Branch node minted for an offered choice.
    pub node: Option<NodeId>,
    /// New subarea if the player moved.
    pub moved_to: Option<String>,
    pub party: PartyChange,
}

/// A playthrough in progress.
pub struct Engine {
    config: EngineConfig,
    generator: StructuredGenerator,
    store: GameStore,
    state: GameState,
}

impl Engine {
    /// Create an engine over any generation backend.
    pub fn new(config: EngineConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        let generator = StructuredGenerator::new(backend, config.retry.clone());
        let store = GameStore::new(config.paths.clone());
        Self {
            config,
            generator,
            store,
            state: GameState::new(),
        }
    }

    /// Create an engine backed by the Anthropic and OpenAI APIs.
    pub fn from_config(config: EngineConfig) -> Self {
        let backend = Arc::new(ClaudeBackend::from_config(&config));
        Self::new(config, backend)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only view of the game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.phase()
    }

    /// Whether a saved game exists on disk and can be resumed. A corrupt
    /// save counts as no save.
    pub fn has_save(&self) -> bool {
        self.store.is_loadable()
    }

    /// Persist the current state.
    pub async fn save(&self) -> Result<(), EngineError> {
        self.store.save(&self.state).await?;
        Ok(())
    }

    /// Save, logging instead of failing.
    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.state).await {
            tracing::error!(error = %e, "Failed to save game state");
        }
    }

    fn require(&self, expected: &[TurnPhase]) -> Result<(), EngineError> {
        let actual = self.phase();
        if expected.contains(&actual) {
            Ok(())
        } else {
            Err(EngineError::WrongPhase {
                expected: expected[0],
                actual,
            })
        }
    }

    // =========================================================================
    // Game setup
    // =========================================================================

    /// Load the saved game. Fills in a missing player portrait and image
    /// source tracking from older saves.
    pub async fn resume(&mut self) -> Result<TurnPhase, EngineError> {
        let mut state = self.store.load_or_none().await.ok_or(EngineError::NoSave)?;
        let mut changed = false;

        if state.last_image_source.is_none() && state.last_scene_image.is_some() {
            state.last_image_source = state.last_scene_text.clone();
            changed = true;
        }
        self.state = state;

        if self.needs_player_portrait() {
            changed |= self.draw_player_portrait().await;
        }
        if changed {
            self.persist().await;
        }

        tracing::info!(phase = ?self.phase(), choices = self.state.choice_log.len(), "Resumed game");
        Ok(self.phase())
    }

    fn needs_player_portrait(&self) -> bool {
        if self.state.companion.is_none() {
            return false;
        }
        let Some(outline) = &self.state.outline else {
            return false;
        };
        match self.state.portraits.get(&outline.player_backstory.name) {
            Some(path) => !path.is_file(),
            None => true,
        }
    }

    async fn draw_player_portrait(&mut self) -> bool {
        let Some(subject) = imagery::portrait_subjects(&self.state).into_iter().next() else {
            return false;
        };
        let (genre, artstyle) = self.look();
        let drawn = imagery::generate_portrait(
            &self.generator,
            &self.config.paths.portraits_dir,
            &subject,
            &genre,
            &artstyle,
        )
        .await;
        match drawn {
            Some(path) => {
                self.state.portraits.insert(subject.name, path);
                true
            }
            None => false,
        }
    }

    fn look(&self) -> (String, String) {
        (
            self.state.genre.clone().unwrap_or_else(|| "fantasy".into()),
            self.state.artstyle.clone().unwrap_or_else(|| "painterly".into()),
        )
    }

    /// Archive any previous game and start a new one. Returns the companion
    /// candidates to choose from.
    pub async fn start_new_game(
        &mut self,
        genre: &str,
        artstyle: &str,
        mode: PremiseMode,
    ) -> Result<Vec<Companion>, EngineError> {
        if let Err(e) = self.store.archive().await {
            tracing::error!(error = %e, "Failed to archive previous game");
        }

        let mut state = GameState::new();
        state.genre = Some(genre.to_string());
        state.artstyle = Some(artstyle.to_string());

        let outline = match mode {
            PremiseMode::Default => default_outline(),
            PremiseMode::Custom => generate_premise(&self.generator, genre).await.into_value(),
        };
        tracing::info!(world = %outline.world_name, ?mode, "Starting new game");
        state.apply_outline(outline);
        continuity::seed_backstory_visits(&self.generator, &mut state).await;

        let candidates = generate_companions(&self.generator, &state).await.into_value();
        state.companion_options = candidates.clone();

        self.state = state;
        self.persist().await;
        Ok(candidates)
    }

    /// Pick one of the offered companions and draw the cast's portraits.
    pub async fn select_companion(&mut self, index: usize) -> Result<Companion, EngineError> {
        self.require(&[TurnPhase::NeedCompanion])?;
        let available = self.state.companion_options.len();
        let companion = self
            .state
            .companion_options
            .get(index)
            .cloned()
            .ok_or(EngineError::InvalidCompanion { index, available })?;

        tracing::info!(companion = %companion.name, "Companion selected");
        self.state.companion_profile = companion.traits;
        self.state.companion = Some(companion.clone());
        self.state.companion_options.clear();

        let (genre, artstyle) = self.look();
        let subjects = imagery::portrait_subjects(&self.state);
        let portraits = imagery::generate_portraits(
            &self.generator,
            &self.config.paths.portraits_dir,
            &subjects,
            &genre,
            &artstyle,
        )
        .await;
        self.state.portraits.extend(portraits);

        self.persist().await;
        Ok(companion)
    }

    // =========================================================================
    // Turn loop
    // =========================================================================

    /// The current scene text. A new scene is generated only when there is
    /// none yet or a choice is pending; otherwise the cached text returns.
    pub async fn get_current_text(&mut self) -> Result<String, EngineError> {
        self.require(&[TurnPhase::InScene, TurnPhase::AwaitingChoice])?;
        if let (Some(text), None) = (&self.state.last_scene_text, &self.state.pending_choice) {
            return Ok(text.clone());
        }

        let choice = self.state.pending_choice.clone();
        let scene = generate_scene(&self.generator, &self.state, choice.as_deref()).await;
        let counts = !scene.is_fallback();
        let scene = scene.into_value();

        continuity::accept_scene(&mut self.state, &scene.text, scene.choices, counts);
        tracing::debug!(
            act = self.state.acts.current + 1,
            scenes_in_act = self.state.acts.scenes_in_act,
            "Scene accepted"
        );
        self.persist().await;
        Ok(scene.text)
    }

    /// Choices for the current scene, generating the scene if needed.
    pub async fn get_current_choices(&mut self) -> Result<Vec<String>, EngineError> {
        self.get_current_text().await?;
        Ok(self.state.last_scene_choices.clone())
    }

    /// Respond to the current scene.
    ///
    /// An offered choice updates the player's traits, the companion's
    /// feelings, the branch map, the location and the party. Any other text
    /// only steers the next scene.
    pub async fn make_choice(&mut self, text: &str) -> Result<ChoiceOutcome, EngineError> {
        self.require(&[TurnPhase::AwaitingChoice])?;
        let text = text.trim();
        let offered = self.state.last_scene_choices.iter().any(|c| c == text);
        let scene = self.state.last_scene_text.clone().unwrap_or_default();

        let mut outcome = ChoiceOutcome {
            offered,
            ..ChoiceOutcome::default()
        };

        if offered {
            let player = infer_player_deltas(&self.generator, &scene, text).await;
            let companion = infer_companion_deltas(&self.generator, &self.state, &scene, text).await;
            let mut updated = self.state.player_profile;
            updated.apply(&player);
            let analysis =
                infer_personality_analysis(&self.generator, &self.state, &scene, text, &updated)
                    .await;
            let claim =
                continuity::infer_location_transition(&self.generator, &self.state, &scene, text)
                    .await;

            self.state.player_profile = updated;
            self.state.companion_profile.apply(&companion);
            if let Some(analysis) = analysis {
                self.state.personality_analysis = analysis;
            }
            outcome.node = Some(continuity::record_choice(&mut self.state, text));
            if let Some(claim) = claim {
                if continuity::apply_location_claim(&mut self.state, &claim) {
                    outcome.moved_to = Some(claim);
                }
            }
            outcome.party = continuity::recompute_party(&mut self.state, &scene);
        } else {
            tracing::info!(input = %text, "Free-text input recorded for next scene");
        }

        self.state.pending_choice = Some(text.to_string());
        self.persist().await;
        Ok(outcome)
    }

    /// Path to an illustration of the current scene. A new image is drawn
    /// only when there is none or it was drawn from a different scene.
    pub async fn get_current_image_path(&mut self) -> Result<Option<PathBuf>, EngineError> {
        let scene = self.get_current_text().await?;

        let current = self
            .state
            .last_scene_image
            .as_ref()
            .filter(|p| p.is_file())
            .filter(|_| self.state.last_image_source.as_deref() == Some(scene.as_str()));
        if let Some(path) = current {
            return Ok(Some(path.clone()));
        }

        let drawn = imagery::generate_scene_image(
            &self.generator,
            &self.config.paths.scene_images_dir,
            &self.state,
            &scene,
        )
        .await;
        if let Some(path) = &drawn {
            self.state.last_scene_image = Some(path.clone());
            self.state.last_image_source = Some(scene);
            self.persist().await;
        }
        Ok(drawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, StoragePaths};
    use crate::testing::MockBackend;
    use tempfile::TempDir;

    fn engine(dir: &TempDir, mock: MockBackend) -> Engine {
        let config = EngineConfig::default()
            .with_paths(StoragePaths::under(dir.path()))
            .with_retry(RetryPolicy::immediate(2));
        Engine::new(config, Arc::new(mock))
    }

    #[tokio::test]
    async fn test_operations_check_phase() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut engine = engine(&temp_dir, MockBackend::new());

        assert_eq!(engine.phase(), TurnPhase::NeedPremise);
        assert!(matches!(
            engine.get_current_text().await,
            Err(EngineError::WrongPhase { actual: TurnPhase::NeedPremise, .. })
        ));
        assert!(matches!(
            engine.make_choice("Go").await,
            Err(EngineError::WrongPhase { .. })
        ));
        assert!(matches!(engine.select_companion(0).await, Err(EngineError::WrongPhase { .. })));
    }

    #[tokio::test]
    async fn test_resume_without_save() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut engine = engine(&temp_dir, MockBackend::new());
        assert!(!engine.has_save());
        assert!(matches!(engine.resume().await, Err(EngineError::NoSave)));
    }

    #[tokio::test]
    async fn test_corrupt_save_is_not_a_save() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let save_file = StoragePaths::under(temp_dir.path()).save_file;
        std::fs::create_dir_all(save_file.parent().unwrap()).unwrap();
        std::fs::write(&save_file, "{ truncated").unwrap();

        let mut engine = engine(&temp_dir, MockBackend::new());
        assert!(!engine.has_save());
        assert!(matches!(engine.resume().await, Err(EngineError::NoSave)));
    }

    #[tokio::test]
    async fn test_offline_game_uses_fallbacks() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut engine = engine(&temp_dir, MockBackend::new());

        let candidates = engine
            .start_new_game("fantasy", "watercolor", PremiseMode::Custom)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].name, "Wary Swordsman");
        assert_eq!(
            engine.state().outline.as_ref().unwrap().world_name,
            "The Drowned Marches"
        );
        assert!(engine.has_save());

        assert!(matches!(
            engine.select_companion(3).await,
            Err(EngineError::InvalidCompanion { index: 3, available: 3 })
        ));
        engine.select_companion(1).await.unwrap();
        assert!(engine.state().portraits.is_empty());

        let text = engine.get_current_text().await.unwrap();
        assert!(text.starts_with("The story stalls"));
        assert_eq!(engine.state().acts.scenes_in_act, 0);
        assert_eq!(engine.phase(), TurnPhase::AwaitingChoice);
        assert_eq!(engine.get_current_image_path().await.unwrap(), None);
    }
}
