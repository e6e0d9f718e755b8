//! Cross-scene continuity tracking ("Continuity" phase).
//!
//! Each scene is read by the oracle once, concurrently, to extract the
//! state of every character and prop plus the story clock at the end of
//! the scene. Once all scenes are in, the snapshots are merged into one
//! thread per entity, ordered by scene, and each consecutive pair of
//! snapshots is checked against a fixed rule set.

use crate::context::SharedContext;
use crate::error::PhaseError;
use crate::gate::{fan_out, OracleGate};
use crate::prompts;
use crate::response::{loose_bool, loose_int, loose_strings, null_as_default, parse_object, ParseFailure};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Tag used for the single story-clock thread.
pub const TIMELINE_TAG: &str = "timeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    Character,
    Prop,
    Timeline,
}

impl fmt::Display for ThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadType::Character => "character",
            ThreadType::Prop => "prop",
            ThreadType::Timeline => "timeline",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterState {
    pub location: Option<String>,
    pub position: Option<String>,
    pub emotional_state: Option<String>,
    #[serde(deserialize_with = "loose_strings")]
    pub holding_props: Vec<String>,
    #[serde(deserialize_with = "loose_bool")]
    pub transition_shown: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropState {
    #[serde(deserialize_with = "loose_bool")]
    pub introduced: bool,
    #[serde(deserialize_with = "loose_bool")]
    pub used: bool,
    pub holder: Option<String>,
    #[serde(deserialize_with = "loose_bool")]
    pub transfer_shown: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineState {
    pub time_of_day: Option<String>,
    #[serde(deserialize_with = "loose_int")]
    pub time_index: Option<i64>,
}

/// Type-specific part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StateDetail {
    Character(CharacterState),
    Prop(PropState),
    Timeline(TimelineState),
}

/// An entity's state at the end of one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub scene_number: u32,
    #[serde(flatten)]
    pub detail: StateDetail,
}

impl StateSnapshot {
    pub fn character(scene_number: u32, state: CharacterState) -> Self {
        Self {
            scene_number,
            detail: StateDetail::Character(state),
        }
    }

    pub fn prop(scene_number: u32, state: PropState) -> Self {
        Self {
            scene_number,
            detail: StateDetail::Prop(state),
        }
    }

    pub fn timeline(scene_number: u32, state: TimelineState) -> Self {
        Self {
            scene_number,
            detail: StateDetail::Timeline(state),
        }
    }
}

/// Ordered snapshots of one entity across scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityThread {
    pub thread_type: ThreadType,
    pub entity_tag: String,
    /// Sorted by scene number.
    pub states: Vec<StateSnapshot>,
}

impl ContinuityThread {
    pub fn new(thread_type: ThreadType, entity_tag: impl Into<String>) -> Self {
        Self {
            thread_type,
            entity_tag: entity_tag.into(),
            states: Vec::new(),
        }
    }

    /// Insert a snapshot, keeping scene order. A later snapshot for the
    /// same scene is ignored.
    pub fn push(&mut self, snapshot: StateSnapshot) {
        match self
            .states
            .binary_search_by_key(&snapshot.scene_number, |s| s.scene_number)
        {
            Ok(_) => {}
            Err(at) => self.states.insert(at, snapshot),
        }
    }

    pub fn with_state(mut self, snapshot: StateSnapshot) -> Self {
        self.push(snapshot);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Suggestion,
}

impl Severity {
    /// Score deducted per issue of this severity.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 0.2,
            Severity::Warning => 0.1,
            Severity::Suggestion => 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityIssue {
    pub thread_type: ThreadType,
    pub entity_tag: String,
    pub from_scene: u32,
    pub to_scene: u32,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchType {
    AddTransition,
    ModifyState,
    AddDialogue,
}

impl PatchType {
    fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "ADD_TRANSITION" => Some(PatchType::AddTransition),
            "MODIFY_STATE" => Some(PatchType::ModifyState),
            "ADD_DIALOGUE" => Some(PatchType::AddDialogue),
            _ => None,
        }
    }

    fn default_for(issue: &ContinuityIssue) -> Self {
        match issue.thread_type {
            ThreadType::Character => PatchType::AddTransition,
            ThreadType::Prop | ThreadType::Timeline => PatchType::ModifyState,
        }
    }
}

/// A proposed repair. Never applied by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPatch {
    /// Index into the report's issue list.
    pub issue_index: usize,
    pub target_scene: u32,
    pub patch_type: PatchType,
    pub insertion_point: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityReport {
    pub threads: Vec<ContinuityThread>,
    pub issues: Vec<ContinuityIssue>,
    pub patches: Vec<RepairPatch>,
    pub continuity_score: f64,
    /// Scenes whose extraction could not be used.
    pub unreadable_scenes: Vec<u32>,
}

/// `1 - sum of severity weights`, floored at zero.
pub fn continuity_score(issues: &[ContinuityIssue]) -> f64 {
    let penalty: f64 = issues.iter().map(|i| i.severity.weight()).sum();
    (1.0 - penalty).max(0.0)
}

/// Check each consecutive pair of snapshots in a thread.
///
/// Snapshots of a different kind than the thread are skipped.
pub fn validate_thread(thread: &ContinuityThread) -> Vec<ContinuityIssue> {
    let mut issues = Vec::new();
    let tag = thread.entity_tag.as_str();

    for pair in thread.states.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let mut raise = |severity: Severity, description: String| {
            issues.push(ContinuityIssue {
                thread_type: thread.thread_type,
                entity_tag: tag.to_string(),
                from_scene: prev.scene_number,
                to_scene: next.scene_number,
                severity,
                description,
            });
        };

        match (&prev.detail, &next.detail) {
            (StateDetail::Character(a), StateDetail::Character(b)) => {
                if let (Some(from), Some(to)) = (&a.location, &b.location) {
                    if !same_value(from, to) && !b.transition_shown {
                        raise(
                            Severity::Warning,
                            format!("[{tag}] moves from {from} to {to} without a transition"),
                        );
                    }
                }
                if let (Some(from), Some(to)) = (&a.position, &b.position) {
                    if same_value(from, "unconscious") && same_value(to, "running") {
                        raise(
                            Severity::Warning,
                            format!("[{tag}] goes from unconscious to running with no recovery"),
                        );
                    }
                }
            }
            (StateDetail::Prop(a), StateDetail::Prop(b)) => {
                if b.used && !a.introduced {
                    raise(
                        Severity::Warning,
                        format!("[{tag}] is used in scene {} before it is introduced", next.scene_number),
                    );
                }
                if let (Some(from), Some(to)) = (&a.holder, &b.holder) {
                    if !same_value(from, to) && !b.transfer_shown {
                        raise(
                            Severity::Warning,
                            format!("[{tag}] passes from {from} to {to} without the handoff shown"),
                        );
                    }
                }
            }
            (StateDetail::Timeline(a), StateDetail::Timeline(b)) => {
                if let (Some(from), Some(to)) = (a.time_index, b.time_index) {
                    if to < from {
                        raise(
                            Severity::Critical,
                            format!("story time runs backwards ({from} to {to})"),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    issues
}

fn same_value(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ============================================================================
// Extraction
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SceneExtraction {
    #[serde(deserialize_with = "null_as_default")]
    characters: Vec<Value>,
    #[serde(deserialize_with = "null_as_default")]
    props: Vec<Value>,
    timeline: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CharacterEntry {
    tag: String,
    #[serde(flatten)]
    state: CharacterState,
}

#[derive(Debug, Deserialize)]
struct PropEntry {
    tag: String,
    #[serde(flatten)]
    state: PropState,
}

/// What one scene contributed.
#[derive(Debug, Default)]
struct SceneStates {
    scene_number: u32,
    characters: Vec<(String, CharacterState)>,
    props: Vec<(String, PropState)>,
    timeline: Option<TimelineState>,
    readable: bool,
}

fn read_extraction(scene_number: u32, answer: Option<String>) -> SceneStates {
    let mut states = SceneStates {
        scene_number,
        ..SceneStates::default()
    };
    let Some(answer) = answer else {
        return states;
    };

    let extraction: SceneExtraction = match parse_object(&answer) {
        Ok(extraction) => extraction,
        Err(ParseFailure { reason, .. }) => {
            tracing::warn!(scene = scene_number, %reason, "continuity extraction unparsable");
            return states;
        }
    };

    let mut dropped = 0usize;
    for value in extraction.characters {
        match serde_json::from_value::<CharacterEntry>(value) {
            Ok(entry) => states.characters.push((tag_key(&entry.tag), entry.state)),
            Err(_) => dropped += 1,
        }
    }
    for value in extraction.props {
        match serde_json::from_value::<PropEntry>(value) {
            Ok(entry) => states.props.push((tag_key(&entry.tag), entry.state)),
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(scene = scene_number, dropped, "dropped malformed continuity entries");
    }
    states.timeline = extraction.timeline.and_then(|value| {
        serde_json::from_value::<TimelineState>(value)
            .map_err(|e| tracing::warn!(scene = scene_number, error = %e, "dropped malformed timeline"))
            .ok()
    });
    states.readable = true;
    states
}

fn tag_key(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_uppercase()
}

/// Merge per-scene states into threads. Input must be in ascending scene order.
fn merge_threads(scenes: Vec<SceneStates>) -> Vec<ContinuityThread> {
    let mut out: BTreeMap<(ThreadType, String), ContinuityThread> = BTreeMap::new();
    for scene in scenes {
        let number = scene.scene_number;
        for (tag, state) in scene.characters {
            out.entry((ThreadType::Character, tag.clone()))
                .or_insert_with(|| ContinuityThread::new(ThreadType::Character, tag))
                .push(StateSnapshot::character(number, state));
        }
        for (tag, state) in scene.props {
            out.entry((ThreadType::Prop, tag.clone()))
                .or_insert_with(|| ContinuityThread::new(ThreadType::Prop, tag))
                .push(StateSnapshot::prop(number, state));
        }
        if let Some(state) = scene.timeline {
            out.entry((ThreadType::Timeline, TIMELINE_TAG.to_string()))
                .or_insert_with(|| ContinuityThread::new(ThreadType::Timeline, TIMELINE_TAG))
                .push(StateSnapshot::timeline(number, state));
        }
    }
    out.into_values().collect()
}

// ============================================================================
// Engine
// ============================================================================

/// Patch response as the oracle writes it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPatch {
    patch_type: String,
    insertion_point: String,
    content: String,
}

/// Tracks entity state across scenes and proposes repairs.
#[derive(Debug, Clone)]
pub struct ContinuityEngine {
    gate: OracleGate,
}

impl ContinuityEngine {
    pub fn new(gate: OracleGate) -> Self {
        Self { gate }
    }

    /// Extract, merge, validate and propose patches.
    pub async fn weave_threads(&self, context: &SharedContext) -> Result<ContinuityReport, PhaseError> {
        let world = context.derived().world_summary.clone();
        let requests: Vec<(u32, String)> = context
            .scene_slices()
            .map(|slice| {
                let prompt = prompts::render(
                    prompts::CONTINUITY_EXTRACT,
                    &[("world", world.as_str()), ("scene", slice.brief().as_str())],
                );
                (slice.scene.scene_number, prompt)
            })
            .collect();

        let gate = self.gate.clone();
        let scenes = fan_out(requests, move |(scene_number, prompt)| {
            let gate = gate.clone();
            async move {
                let answer = gate.ask("continuity extraction", &prompt).await;
                read_extraction(scene_number, answer)
            }
        })
        .await?;

        let unreadable_scenes: Vec<u32> = scenes
            .iter()
            .filter(|s| !s.readable)
            .map(|s| s.scene_number)
            .collect();

        // Every extraction has landed; only now are threads complete.
        let threads = merge_threads(scenes);
        let issues: Vec<ContinuityIssue> = threads.iter().flat_map(validate_thread).collect();
        let patches = self.request_patches(context, &issues).await?;
        let continuity_score = continuity_score(&issues);

        tracing::debug!(
            threads = threads.len(),
            issues = issues.len(),
            patches = patches.len(),
            score = continuity_score,
            "continuity woven"
        );

        Ok(ContinuityReport {
            threads,
            issues,
            patches,
            continuity_score,
            unreadable_scenes,
        })
    }

    async fn request_patches(
        &self,
        context: &SharedContext,
        issues: &[ContinuityIssue],
    ) -> Result<Vec<RepairPatch>, PhaseError> {
        let requests: Vec<(usize, ContinuityIssue, String)> = issues
            .iter()
            .enumerate()
            .map(|(index, issue)| {
                let scene_text = context
                    .scene(issue.to_scene)
                    .map(|s| s.text().to_string())
                    .unwrap_or_default();
                let prompt = prompts::render(
                    prompts::CONTINUITY_PATCH,
                    &[
                        ("from_scene", issue.from_scene.to_string().as_str()),
                        ("to_scene", issue.to_scene.to_string().as_str()),
                        ("issue", issue.description.as_str()),
                        ("scene_text", scene_text.as_str()),
                    ],
                );
                (index, issue.clone(), prompt)
            })
            .collect();

        let gate = self.gate.clone();
        let patches = fan_out(requests, move |(index, issue, prompt)| {
            let gate = gate.clone();
            async move {
                let answer = gate.ask("continuity patch", &prompt).await?;
                let raw: RawPatch = match parse_object(&answer) {
                    Ok(raw) => raw,
                    Err(failure) => {
                        tracing::warn!(issue = index, reason = %failure.reason, "patch response unparsable");
                        return None;
                    }
                };
                if raw.content.trim().is_empty() {
                    return None;
                }
                Some(RepairPatch {
                    issue_index: index,
                    target_scene: issue.to_scene,
                    patch_type: PatchType::parse(&raw.patch_type)
                        .unwrap_or_else(|| PatchType::default_for(&issue)),
                    insertion_point: raw.insertion_point,
                    content: raw.content,
                })
            }
        })
        .await?;

        Ok(patches.into_iter().flatten().collect())
    }
}
