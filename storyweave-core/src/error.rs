//! Error types shared across the engine.
//!
//! Generation and validation failures never escape the generator client;
//! they are recovered by retry and fallback. Persistence failures are logged
//! by the facade. Only misuse of the facade surfaces as [`EngineError`].

use crate::engine::TurnPhase;
use thiserror::Error;

/// A backend call failed or produced unusable content.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text backend error: {0}")]
    Text(#[from] claude::Error),

    #[error("image backend error: {0}")]
    Image(#[from] imagegen::Error),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unparseable reply: {0}")]
    Unparseable(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl GenerationError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Text(e) => e.is_retryable(),
            GenerationError::Image(e) => e.is_retryable(),
            GenerationError::Unavailable(_) => false,
            GenerationError::Unparseable(_) | GenerationError::Invalid(_) => true,
        }
    }
}

/// Structured output failed a shape or range check.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {reason}")]
pub struct ValidationError {
    /// JSON-pointer-like location of the offending value (`$.npcs[2].name`).
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from loading or saving the game document and its artifacts.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the orchestration facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation requires phase {expected:?}, but the game is in {actual:?}")]
    WrongPhase {
        expected: TurnPhase,
        actual: TurnPhase,
    },

    #[error("no saved game to resume")]
    NoSave,

    #[error("companion index {index} out of range ({available} offered)")]
    InvalidCompanion { index: usize, available: usize },

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}
