//! Testing utilities for the engine.
//!
//! This module provides:
//! - `MockBackend` for deterministic generation without API calls
//! - `fixtures` with a small hand-written outline and companion

use crate::backend::{GenerationBackend, ImageSize, Prompt, StructuredReply};
use crate::error::GenerationError;
use crate::shape::Shape;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A scripted backend reply.
#[derive(Debug, Clone)]
enum Reply {
    Value(Value),
    Text(String),
    Failure,
}

/// A backend that returns scripted replies, routed by [`Prompt::purpose`].
///
/// Replies for a purpose are returned in order; the last one repeats
/// forever. A purpose with no script answers with
/// [`GenerationError::Unavailable`], as a backend without credentials would.
#[derive(Default)]
pub struct MockBackend {
    structured: Mutex<HashMap<String, VecDeque<Reply>>>,
    text: Mutex<HashMap<String, VecDeque<Reply>>>,
    image_bytes: Option<Vec<u8>>,
    failing_images: Vec<String>,
    image_delay: Option<Duration>,

    prompts: Mutex<Vec<Prompt>>,
    image_prompts: Mutex<Vec<String>>,
    structured_calls: AtomicU32,
    text_calls: AtomicU32,
    image_calls: AtomicU32,
    images_in_flight: AtomicU32,
    peak_images_in_flight: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, structured: bool, purpose: &str, reply: Reply) -> Self {
        {
            let table = if structured { &self.structured } else { &self.text };
            let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(purpose.to_string()).or_default().push_back(reply);
        }
        self
    }

    /// Queue a structured value for `purpose`.
    pub fn on_structured(self, purpose: &str, value: Value) -> Self {
        self.script(true, purpose, Reply::Value(value))
    }

    /// Queue a raw-text structured reply, as from a backend without tool use.
    pub fn on_structured_text(self, purpose: &str, text: &str) -> Self {
        self.script(true, purpose, Reply::Text(text.to_string()))
    }

    /// Queue a transient failure for a structured request.
    pub fn on_structured_failure(self, purpose: &str) -> Self {
        self.script(true, purpose, Reply::Failure)
    }

    /// Queue a free-text reply for `purpose`.
    pub fn on_text(self, purpose: &str, text: &str) -> Self {
        self.script(false, purpose, Reply::Text(text.to_string()))
    }

    pub fn on_text_failure(self, purpose: &str) -> Self {
        self.script(false, purpose, Reply::Failure)
    }

    /// Answer every image request with `bytes`.
    pub fn with_images(mut self, bytes: Vec<u8>) -> Self {
        self.image_bytes = Some(bytes);
        self
    }

    /// Fail (transiently) every image request whose prompt contains `needle`.
    pub fn failing_images_for(mut self, needle: &str) -> Self {
        self.failing_images.push(needle.to_string());
        self
    }

    /// Hold every image request open for `delay` before answering.
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = Some(delay);
        self
    }

    pub fn structured_calls(&self) -> u32 {
        self.structured_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> u32 {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Most image requests that were running at the same time.
    pub fn peak_image_concurrency(&self) -> u32 {
        self.peak_images_in_flight.load(Ordering::SeqCst)
    }

    /// Every text and structured prompt received, in order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every image prompt received, in order.
    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_reply(
        &self,
        table: &Mutex<HashMap<String, VecDeque<Reply>>>,
        prompt: &Prompt,
    ) -> Result<Reply, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
        let queue = table
            .get_mut(&prompt.purpose)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| GenerationError::Unavailable(format!("no script for {}", prompt.purpose)))?;

        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Reply::Failure) | None => Err(GenerationError::Unparseable(format!(
                "scripted failure for {}",
                prompt.purpose
            ))),
            Some(reply) => Ok(reply),
        }
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate_structured(
        &self,
        prompt: &Prompt,
        _shape: &Shape,
    ) -> Result<StructuredReply, GenerationError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply(&self.structured, prompt)? {
            Reply::Value(value) => Ok(StructuredReply::Value(value)),
            Reply::Text(text) => Ok(StructuredReply::Text(text)),
            Reply::Failure => Err(GenerationError::Unparseable("scripted failure".into())),
        }
    }

    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply(&self.text, prompt)? {
            Reply::Text(text) => Ok(text),
            Reply::Value(value) => Ok(value.to_string()),
            Reply::Failure => Err(GenerationError::Unparseable("scripted failure".into())),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _size: ImageSize,
    ) -> Result<Vec<u8>, GenerationError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.image_prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = self.image_delay {
            let running = self.images_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_images_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.images_in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.failing_images.iter().any(|n| prompt.contains(n.as_str())) {
            return Err(GenerationError::Unparseable("scripted image failure".into()));
        }
        self.image_bytes
            .clone()
            .ok_or_else(|| GenerationError::Unavailable("no image script".into()))
    }
}

/// Small hand-written story data for tests.
pub mod fixtures {
    use crate::premise::{
        ActPlan, Faction, KeyLocation, Mystery, NarrativeOutline, Npc, Place, PlayerBackstory,
        StartingTraits,
    };
    use crate::state::{Companion, CompanionProfile};

    fn place(name: &str, description: &str) -> Place {
        Place {
            name: name.into(),
            description: description.into(),
        }
    }

    fn npc(id: &str, name: &str, role: &str) -> Npc {
        Npc {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            description: format!("{name}, the {role}."),
            goal: "Survive the season.".into(),
            visual_description: format!("{name} in a rain-dark cloak."),
        }
    }

    /// Two regions, three NPCs, two short acts.
    pub fn outline() -> NarrativeOutline {
        NarrativeOutline {
            world_name: "Greywater".into(),
            world_overview: "A river valley where the fog never lifts.".into(),
            key_locations: vec![
                KeyLocation {
                    name: "Riverlands".into(),
                    subareas: vec![
                        place("Old Mill", "A creaking mill over black water."),
                        place("Ferry Crossing", "A rope ferry across the slow river."),
                    ],
                },
                KeyLocation {
                    name: "Saltreach".into(),
                    subareas: vec![
                        place("Harbor Docks", "Rotting piers crowded with gulls."),
                        place("Fish Market", "Stalls of silver fish and louder gossip."),
                    ],
                },
            ],
            factions: vec![Faction {
                name: "The Wardens".into(),
                description: "Keepers of the river locks.".into(),
            }],
            mysteries: vec![
                Mystery {
                    id: "m1".into(),
                    prompt: "Who opened the locks?".into(),
                    answer: "The miller.".into(),
                    twist: "He was paid by the Wardens.".into(),
                },
                Mystery {
                    id: "m2".into(),
                    prompt: "What sank the ferry?".into(),
                    answer: "A smuggler's cargo.".into(),
                    twist: "The cargo was alive.".into(),
                },
            ],
            npcs: vec![
                npc("npc1", "Mara Quill", "ferrywoman"),
                npc("npc2", "Bram Holt", "miller"),
                npc("npc3", "Ivo Senn", "smuggler"),
            ],
            player_backstory: PlayerBackstory {
                name: "Ash".into(),
                origin_story: "You grew up on the docks. Nobody remembers your parents.".into(),
                starting_traits: StartingTraits {
                    bravery: 5,
                    curiosity: 7,
                    empathy: 6,
                    communication: 4,
                    trust: 3,
                },
                starting_locations: vec!["Harbor Docks".into(), "Nowhere".into()],
            },
            five_act_plan: vec![
                ActPlan {
                    title: "Fog on the Water".into(),
                    inciting_incident: "The locks open at midnight.".into(),
                    tied_mystery: "m1".into(),
                    tie_npc: "npc1".into(),
                    twist: "The lockkeeper is missing.".into(),
                    scenes_count: 3,
                },
                ActPlan {
                    title: "The Sunken Ferry".into(),
                    inciting_incident: "The ferry goes down with all hands.".into(),
                    tied_mystery: "m2".into(),
                    tie_npc: "npc2".into(),
                    twist: "Bram was aboard.".into(),
                    scenes_count: 2,
                },
            ],
        }
    }

    pub fn companion() -> Companion {
        Companion {
            name: "Tamsin".into(),
            description: "A sharp-eyed tracker".into(),
            visual_description: "A wiry woman with a crossbow and braided hair.".into(),
            traits: CompanionProfile {
                trust: 4.0,
                fear: 1.0,
                affection: 6.0,
            },
        }
    }
}
