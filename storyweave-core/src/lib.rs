//! Branching visual novel engine driven by text and image generation.
//!
//! This crate provides:
//! - A persistent game state with a branch map, five-act progression,
//!   locations, party and personality profiles
//! - A schema-validated generation client with retry and fallback
//! - Narrative continuity tracking (locations, party, acts)
//! - Trait inference for the player and their companion
//! - Portrait and scene illustration
//!
//! # Quick Start
//!
//! ```ignore
//! use storyweave_core::{Engine, EngineConfig, PremiseMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = Engine::from_config(EngineConfig::from_env());
//!
//!     engine.start_new_game("gothic horror", "oil painting", PremiseMode::Custom).await?;
//!     engine.select_companion(0).await?;
//!
//!     println!("{}", engine.get_current_text().await?);
//!     let choices = engine.get_current_choices().await?;
//!     engine.make_choice(&choices[0]).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod branch;
pub mod companions;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod error;
pub mod generator;
pub mod imagery;
pub mod premise;
pub mod scene;
pub mod shape;
pub mod state;
pub mod store;
pub mod testing;
pub mod traits;

// Primary public API
pub use backend::{ClaudeBackend, GenerationBackend, ImageSize, Prompt, StructuredReply};
pub use branch::{BranchNode, BranchTree, NodeId};
pub use config::{EngineConfig, RetryPolicy, StoragePaths};
pub use engine::{ChoiceOutcome, Engine, TurnPhase};
pub use error::{EngineError, GenerationError, PersistError, ValidationError};
pub use generator::{Generated, Source, StructuredGenerator};
pub use premise::{NarrativeOutline, PremiseMode};
pub use shape::{Field, Shape};
pub use state::{Companion, CompanionProfile, GameState, PlayerProfile};
pub use store::GameStore;
pub use testing::MockBackend;
