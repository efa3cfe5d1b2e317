//! Schema-validated generation with retry and fallback.
//!
//! [`StructuredGenerator`] wraps a [`GenerationBackend`] and never fails: each
//! call retries with exponential backoff and, once the attempt budget is
//! spent, answers with the caller's pre-authored fallback. Transport errors,
//! unparseable replies and shape violations all consume the same budget.

use crate::backend::{GenerationBackend, ImageSize, Prompt, StructuredReply};
use crate::config::RetryPolicy;
use crate::error::{GenerationError, ValidationError};
use crate::shape::{extract_json, Shape};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Where a generated value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Model,
    Fallback,
}

/// A value produced by the generator, with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub source: Source,
    /// Backend calls made, including the successful one.
    pub attempts: u32,
}

impl<T> Generated<T> {
    pub fn is_fallback(&self) -> bool {
        self.source == Source::Fallback
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Generation client shared by every recipe in the engine.
#[derive(Clone)]
pub struct StructuredGenerator {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
}

impl StructuredGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Request a value of shape `shape` and deserialize it into `T`.
    pub async fn generate<T>(&self, prompt: &Prompt, shape: &Shape, fallback: T) -> Generated<T>
    where
        T: DeserializeOwned,
    {
        self.generate_checked(prompt, shape, |_: &T| Ok(()), fallback)
            .await
    }

    /// Like [`generate`](Self::generate), with an extra semantic check run
    /// after deserialization (cross references, counts the shape cannot
    /// express). A failed check consumes an attempt.
    pub async fn generate_checked<T, C>(
        &self,
        prompt: &Prompt,
        shape: &Shape,
        check: C,
        fallback: T,
    ) -> Generated<T>
    where
        T: DeserializeOwned,
        C: Fn(&T) -> Result<(), ValidationError>,
    {
        let backend = self.backend.as_ref();
        let check = &check;
        let outcome = self
            .with_retries(&prompt.purpose, move || async move {
                let reply = backend.generate_structured(prompt, shape).await?;
                let value = shape.conform(recover(reply)?)?;
                let typed: T = serde_json::from_value(value)
                    .map_err(|e| GenerationError::Unparseable(e.to_string()))?;
                check(&typed)?;
                Ok::<T, GenerationError>(typed)
            })
            .await;

        settle(outcome, fallback)
    }

    /// Request free text. `accept` parses and validates the reply; an `Err`
    /// consumes an attempt.
    pub async fn generate_text<T, A>(&self, prompt: &Prompt, accept: A, fallback: T) -> Generated<T>
    where
        A: Fn(&str) -> Result<T, ValidationError>,
    {
        let backend = self.backend.as_ref();
        let accept = &accept;
        let outcome = self
            .with_retries(&prompt.purpose, move || async move {
                let text = backend.generate_text(prompt).await?;
                Ok::<T, GenerationError>(accept(&text)?)
            })
            .await;

        settle(outcome, fallback)
    }

    /// Request an image. `None` once every attempt has failed.
    pub async fn generate_image(
        &self,
        purpose: &str,
        prompt: &str,
        size: ImageSize,
    ) -> Option<Vec<u8>> {
        let backend = self.backend.as_ref();
        self.with_retries(purpose, move || backend.generate_image(prompt, size))
            .await
            .ok()
            .map(|(bytes, _)| bytes)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget runs out. `Err` carries the number of attempts made.
    async fn with_retries<T, F, Fut>(&self, purpose: &str, mut operation: F) -> Result<(T, u32), u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let attempts = self.retry.attempts.max(1);

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, purpose, "Generation succeeded after retry");
                    }
                    return Ok((value, attempt));
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(attempt, purpose, error = %e, "Generation failed permanently");
                    return Err(attempt);
                }
                Err(e) if attempt < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        purpose,
                        error = %e,
                        "Generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(attempt, purpose, error = %e, "Generation failed");
                }
            }
        }

        tracing::error!(attempts, purpose, "Generation attempts exhausted");
        Err(attempts)
    }
}

/// Turn a backend reply into JSON, recovering embedded structure from text.
fn recover(reply: StructuredReply) -> Result<Value, GenerationError> {
    let text = match reply {
        StructuredReply::Value(Value::String(text)) | StructuredReply::Text(text) => text,
        StructuredReply::Value(value) => return Ok(value),
    };

    serde_json::from_str(&text)
        .ok()
        .or_else(|| extract_json(&text))
        .ok_or_else(|| {
            let preview: String = text.chars().take(80).collect();
            GenerationError::Unparseable(format!("no JSON found in reply: {preview}"))
        })
}

fn settle<T>(outcome: Result<(T, u32), u32>, fallback: T) -> Generated<T> {
    match outcome {
        Ok((value, attempts)) => Generated {
            value,
            source: Source::Model,
            attempts,
        },
        Err(attempts) => Generated {
            value: fallback,
            source: Source::Fallback,
            attempts,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Field;
    use crate::testing::MockBackend;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        moved: bool,
    }

    fn shape() -> Shape {
        Shape::record(vec![Field::required("moved", Shape::Bool)])
    }

    fn generator(mock: &Arc<MockBackend>, attempts: u32) -> StructuredGenerator {
        StructuredGenerator::new(mock.clone(), RetryPolicy::immediate(attempts))
    }

    #[tokio::test]
    async fn test_always_invalid_uses_exactly_budget_then_fallback() {
        let mock = Arc::new(MockBackend::new().on_structured("check", json!({ "wrong": 1 })));
        let out = generator(&mock, 3)
            .generate(&Prompt::new("check", "?"), &shape(), Answer { moved: false })
            .await;

        assert!(out.is_fallback());
        assert_eq!(out.attempts, 3);
        assert_eq!(out.value, Answer { moved: false });
        assert_eq!(mock.structured_calls(), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let mock = Arc::new(
            MockBackend::new()
                .on_structured_failure("check")
                .on_structured_text("check", "Not JSON at all")
                .on_structured_text("check", "Answer: {\"moved\": true} done"),
        );
        let out = generator(&mock, 4)
            .generate(&Prompt::new("check", "?"), &shape(), Answer { moved: false })
            .await;

        assert_eq!(out.source, Source::Model);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.value, Answer { moved: true });
    }

    #[tokio::test]
    async fn test_unavailable_backend_falls_back_immediately() {
        let mock = Arc::new(MockBackend::new());
        let out = generator(&mock, 5)
            .generate(&Prompt::new("unscripted", "?"), &shape(), Answer { moved: false })
            .await;

        assert!(out.is_fallback());
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn test_check_failure_consumes_attempts() {
        let mock = Arc::new(MockBackend::new().on_structured("check", json!({ "moved": true })));
        let out = generator(&mock, 2)
            .generate_checked(
                &Prompt::new("check", "?"),
                &shape(),
                |a: &Answer| {
                    if a.moved {
                        Err(ValidationError::new("$.moved", "not allowed"))
                    } else {
                        Ok(())
                    }
                },
                Answer { moved: false },
            )
            .await;

        assert!(out.is_fallback());
        assert_eq!(mock.structured_calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_text_with_acceptance() {
        let mock = Arc::new(MockBackend::new().on_text("story", "   ").on_text("story", "Hello."));
        let accept = |t: &str| {
            let t = t.trim();
            if t.is_empty() {
                Err(ValidationError::new("$", "empty"))
            } else {
                Ok(t.to_string())
            }
        };
        let out = generator(&mock, 3)
            .generate_text(&Prompt::new("story", "?"), accept, "fallback".to_string())
            .await;

        assert_eq!(out.value, "Hello.");
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test]
    async fn test_generate_image_gives_up() {
        let mock = Arc::new(MockBackend::new().failing_images_for("harbor"));
        let bytes = generator(&mock, 3)
            .generate_image("scene_image", "a quiet harbor", ImageSize::LANDSCAPE)
            .await;
        assert!(bytes.is_none());
        assert_eq!(mock.image_calls(), 3);
    }
}
