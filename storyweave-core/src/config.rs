//! Engine configuration.
//!
//! One [`EngineConfig`] is built at startup (usually via [`EngineConfig::from_env`])
//! and handed to every component that needs it. Nothing reads the environment
//! after construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TEXT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// Retry schedule for generation calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of random spread applied around each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps. Used by tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based), before the next.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay.as_millis() as u64);

        let spread = (capped as f64 * self.jitter.clamp(0.0, 1.0)) as i64;
        let millis = if spread > 0 {
            use rand::Rng;
            let jitter = rand::thread_rng().gen_range(-spread..=spread);
            (capped as i64 + jitter).max(0) as u64
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

/// Where the save document and generated artifacts live.
#[derive(Debug, Clone, PartialEq)]
pub struct StoragePaths {
    pub save_file: PathBuf,
    pub portraits_dir: PathBuf,
    pub scene_images_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl StoragePaths {
    /// Standard layout under a single data directory.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            save_file: root.join("story").join("game_state.json"),
            portraits_dir: root.join("images").join("character_portraits"),
            scene_images_dir: root.join("images").join("generated_images"),
            archive_dir: root.join("archive"),
        }
    }
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::under(".")
    }
}

/// Everything the engine needs to know at construction time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub text_model: String,
    pub image_model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub paths: StoragePaths,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
            paths: StoragePaths::default(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        config.anthropic_api_key = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty());
        config.openai_api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());

        if let Some(model) = lookup("STORYWEAVE_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(model) = lookup("STORYWEAVE_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(attempts) = lookup("STORYWEAVE_RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.retry.attempts = attempts;
        }
        if let Some(ms) = lookup("STORYWEAVE_RETRY_BASE_MS").and_then(|v| v.parse().ok()) {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(dir) = lookup("STORYWEAVE_DATA_DIR") {
            config.paths = StoragePaths::under(dir);
        }

        config
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_paths(mut self, paths: StoragePaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_data_dir(mut self, root: impl AsRef<Path>) -> Self {
        self.paths = StoragePaths::under(root);
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
        };
        for _ in 0..50 {
            let ms = policy.delay_after(1).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", ""),
            ("STORYWEAVE_RETRY_ATTEMPTS", "2"),
            ("STORYWEAVE_RETRY_BASE_MS", "not a number"),
            ("STORYWEAVE_DATA_DIR", "/tmp/sw"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(
            config.paths.save_file,
            PathBuf::from("/tmp/sw/story/game_state.json")
        );
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
    }
}
