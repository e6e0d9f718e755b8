//! Testing utilities for the QA engine.
//!
//! This module provides:
//! - `ScriptedOracle`, a deterministic oracle with canned answers
//! - Fixtures for a small, well-formed three-scene script

use crate::world::{RawEntity, RawWorldConfig, Scene};
use async_trait::async_trait;
use oracle::{Oracle, OracleError};
use std::sync::Mutex;
use std::time::Duration;

/// What a scripted rule does when it matches.
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
    Panic,
}

#[derive(Debug, Clone)]
struct Rule {
    needles: Vec<String>,
    reply: Reply,
}

/// An oracle that answers from a script of rules.
///
/// Rules are checked in the order they were added; the first rule whose
/// needles all occur in the prompt wins. Unmatched prompts get the default
/// answer. Every prompt is recorded.
#[derive(Debug)]
pub struct ScriptedOracle {
    rules: Vec<Rule>,
    default_reply: String,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    /// Create an oracle that answers everything with an empty string.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: String::new(),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts containing `needle` with `reply`.
    pub fn respond_to(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.respond_when([needle.into()], reply)
    }

    /// Answer prompts containing every needle with `reply`.
    pub fn respond_when<I, S>(mut self, needles: I, reply: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(Rule {
            needles: needles.into_iter().map(Into::into).collect(),
            reply: Reply::Text(reply.into()),
        });
        self
    }

    /// Fail prompts containing `needle` with a network error.
    pub fn fail_on(mut self, needle: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needles: vec![needle.into()],
            reply: Reply::Fail,
        });
        self
    }

    /// Panic on prompts containing `needle`.
    pub fn panic_on(mut self, needle: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needles: vec![needle.into()],
            reply: Reply::Panic,
        });
        self
    }

    /// Answer unmatched prompts with `reply`.
    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of prompts received containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn infer(&self, prompt: &str) -> Result<String, OracleError> {
        self.record(prompt);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rule = self
            .rules
            .iter()
            .find(|rule| rule.needles.iter().all(|n| prompt.contains(n.as_str())));

        match rule.map(|r| &r.reply) {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail) => Err(OracleError::Network("scripted failure".to_string())),
            Some(Reply::Panic) => panic!("scripted oracle panic"),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A small world: two characters, two locations, one owned prop.
pub fn sample_world() -> RawWorldConfig {
    RawWorldConfig::new()
        .with_character(RawEntity::new("CHAR_MEI", "Mei").with_field("role", "night courier"))
        .with_character(RawEntity::new("CHAR_OKAFOR", "Okafor").with_field("role", "harbor master"))
        .with_location(RawEntity::new("LOC_PIER", "Pier 9"))
        .with_location(RawEntity::new("LOC_MARKET", "Night Market"))
        .with_prop(
            RawEntity::new("PROP_LANTERN", "Storm lantern").with_field("owner", "CHAR_MEI"),
        )
}

/// A notation-clean three-scene script using every tag in `sample_world`.
pub fn sample_script() -> String {
    [
        "## Scene 1: Arrival",
        "(/scene_frame_chunk_start/)",
        "[1.1.cA] (Wide)",
        "[CHAR_MEI] steps onto [LOC_PIER] holding the [PROP_LANTERN].",
        "[1.1.cB] (Close-up)",
        "Rain beads on the glass.",
        "[1.2.cA] (Medium)",
        "[CHAR_OKAFOR] watches from the harbor office.",
        "(/scene_frame_chunk_end/)",
        "",
        "## Scene 2: The Market",
        "(/scene_frame_chunk_start/)",
        "[2.1.cA] (Tracking)",
        "[CHAR_MEI] walks from the pier into [LOC_MARKET].",
        "[2.1.cB] (Over-the-shoulder)",
        "[CHAR_OKAFOR] follows at a distance.",
        "(/scene_frame_chunk_end/)",
        "",
        "## Scene 3: Exchange",
        "(/scene_frame_chunk_start/)",
        "[3.1.cA] (Two-shot)",
        "[CHAR_MEI] hands the [PROP_LANTERN] to [CHAR_OKAFOR] in [LOC_MARKET].",
        "(/scene_frame_chunk_end/)",
    ]
    .join("\n")
}

/// Scene records matching `sample_script`.
pub fn sample_scenes() -> Vec<Scene> {
    let script = sample_script();
    crate::context::split_sections(&script)
        .into_iter()
        .map(|section| Scene::new(section.scene_number, section.text))
        .zip([
            ("Mei arrives", vec!["CHAR_MEI", "CHAR_OKAFOR"], vec!["LOC_PIER"], vec!["PROP_LANTERN"]),
            ("Pursuit through the market", vec!["CHAR_MEI", "CHAR_OKAFOR"], vec!["LOC_MARKET"], vec![]),
            ("The handoff", vec!["CHAR_MEI", "CHAR_OKAFOR"], vec!["LOC_MARKET"], vec!["PROP_LANTERN"]),
        ])
        .map(|(scene, (purpose, characters, locations, props))| {
            scene
                .with_purpose(purpose)
                .with_characters(characters)
                .with_locations(locations)
                .with_props(props)
        })
        .collect()
}
