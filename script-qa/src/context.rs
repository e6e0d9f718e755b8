//! The shared, read-only context every phase analyzes.
//!
//! `SharedContext` is built once per run. All validation happens in the
//! constructor, and every derived summary is computed eagerly there, so the
//! value can be wrapped in an `Arc` and read concurrently by any number of
//! phase workers without further coordination.

use crate::error::{QaError, QaResult};
use crate::tags::TagVocabulary;
use crate::world::{EntityKind, RawWorldConfig, Scene, WorldConfig, WorldEntity};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

lazy_static! {
    /// Loose scene header used only to split the script into sections.
    static ref SECTION_HEADER: Regex = Regex::new(r"(?mi)^[ \t]*#{1,6}[ \t]*scene[ \t]+(\d+)\b").unwrap();
}

/// The part of the full script that belongs to one scene marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptSection {
    pub scene_number: u32,
    /// Header line included.
    pub text: String,
}

/// Summaries derived from the inputs at construction time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedSummaries {
    /// Every declared tag.
    pub declared_tags: BTreeSet<String>,
    /// Declared tags grouped by prefix.
    pub tags_by_prefix: BTreeMap<String, Vec<String>>,
    /// Prop tag to the character tag expected to own it.
    pub prop_owners: BTreeMap<String, String>,
    /// Multi-line world description for prompts.
    pub world_summary: String,
    /// One line per scene: number, purpose and declared tags.
    pub scene_outline: String,
    /// The script split at its scene markers.
    pub sections: Vec<ScriptSection>,
}

/// Immutable inputs plus derived summaries for one QA run.
#[derive(Debug, Clone)]
pub struct SharedContext {
    pitch: String,
    script: String,
    scenes: Vec<Scene>,
    world: WorldConfig,
    vocabulary: TagVocabulary,
    derived: DerivedSummaries,
}

impl SharedContext {
    /// Validate the inputs and compute the derived summaries.
    ///
    /// Scenes are sorted by number and must run 1..=N without gaps.
    pub fn new(
        pitch: impl Into<String>,
        script: impl Into<String>,
        scenes: Vec<Scene>,
        world: &RawWorldConfig,
        vocabulary: TagVocabulary,
    ) -> QaResult<Self> {
        if scenes.is_empty() {
            return Err(QaError::NoScenes);
        }
        let world = WorldConfig::from_raw(world, &vocabulary)?;

        let mut scenes = scenes;
        scenes.sort_by_key(|s| s.scene_number);
        let contiguous = scenes
            .iter()
            .enumerate()
            .all(|(i, s)| s.scene_number as usize == i + 1);
        if !contiguous {
            return Err(QaError::SceneNumbering {
                count: scenes.len(),
                found: scenes.iter().map(|s| s.scene_number).collect(),
            });
        }

        let script = script.into();
        let derived = derive_summaries(&world, &scenes, &script, &vocabulary);

        tracing::debug!(
            scenes = scenes.len(),
            entities = world.len(),
            sections = derived.sections.len(),
            "shared context built"
        );

        Ok(Self {
            pitch: pitch.into(),
            script,
            scenes,
            world,
            vocabulary,
            derived,
        })
    }

    /// The story pitch.
    pub fn pitch(&self) -> &str {
        &self.pitch
    }

    /// The full script text.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Scenes in ascending order.
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// The validated world.
    pub fn world(&self) -> &WorldConfig {
        &self.world
    }

    /// The tag vocabulary in force.
    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocabulary
    }

    /// Derived summaries.
    pub fn derived(&self) -> &DerivedSummaries {
        &self.derived
    }

    /// Every declared tag.
    pub fn declared_tags(&self) -> &BTreeSet<String> {
        &self.derived.declared_tags
    }

    /// A read-only view of one scene.
    pub fn scene(&self, scene_number: u32) -> Option<SceneSlice<'_>> {
        let index = (scene_number as usize).checked_sub(1)?;
        self.scenes.get(index).map(|scene| SceneSlice {
            scene,
            context: self,
        })
    }

    /// Views of every scene, in order.
    pub fn scene_slices(&self) -> impl Iterator<Item = SceneSlice<'_>> {
        self.scenes.iter().map(move |scene| SceneSlice {
            scene,
            context: self,
        })
    }
}

/// One scene plus the context it sits in.
#[derive(Debug, Clone, Copy)]
pub struct SceneSlice<'a> {
    pub scene: &'a Scene,
    pub context: &'a SharedContext,
}

impl<'a> SceneSlice<'a> {
    /// The scene's text: its own content, or its section of the script.
    pub fn text(&self) -> &'a str {
        if !self.scene.content.trim().is_empty() {
            return &self.scene.content;
        }
        self.context
            .derived
            .sections
            .iter()
            .find(|s| s.scene_number == self.scene.scene_number)
            .map(|s| s.text.as_str())
            .unwrap_or("")
    }

    /// World entities the scene declares or mentions.
    pub fn entities(&self) -> Vec<&'a WorldEntity> {
        let text = self.text();
        let mentioned = self.context.vocabulary.referenced_tags(text);
        let declared: BTreeSet<&str> = self.scene.declared_tags().collect();
        self.context
            .world
            .entities()
            .iter()
            .filter(|e| declared.contains(e.tag.as_str()) || mentioned.contains(e.tag.as_str()))
            .collect()
    }

    /// A prompt preamble describing this scene and its entities.
    pub fn brief(&self) -> String {
        let mut brief = format!("## Scene {}\n", self.scene.scene_number);
        if !self.scene.purpose.is_empty() {
            brief.push_str(&format!("Purpose: {}\n", self.scene.purpose));
        }
        if !self.scene.entry_state.is_empty() {
            brief.push_str(&format!("Entry state: {}\n", format_state(&self.scene.entry_state)));
        }
        if !self.scene.exit_state.is_empty() {
            brief.push_str(&format!("Exit state: {}\n", format_state(&self.scene.exit_state)));
        }
        let entities = self.entities();
        if !entities.is_empty() {
            brief.push_str("Entities:\n");
            for entity in entities {
                brief.push_str(&format!("- {}\n", entity.summary_line()));
            }
        }
        brief.push_str("\n### Text\n");
        brief.push_str(self.text());
        brief.push('\n');
        brief
    }
}

fn format_state(state: &BTreeMap<String, String>) -> String {
    state
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn derive_summaries(
    world: &WorldConfig,
    scenes: &[Scene],
    script: &str,
    vocabulary: &TagVocabulary,
) -> DerivedSummaries {
    let declared_tags: BTreeSet<String> = world
        .entities()
        .iter()
        .map(|e| e.tag.to_string())
        .collect();

    let mut tags_by_prefix: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for tag in &declared_tags {
        if let Some(prefix) = vocabulary.prefix_of(tag) {
            tags_by_prefix
                .entry(prefix.to_string())
                .or_default()
                .push(tag.clone());
        }
    }

    let prop_owners: BTreeMap<String, String> = world
        .of_kind(EntityKind::Prop)
        .filter_map(|p| p.owner.as_ref().map(|o| (p.tag.to_string(), o.to_string())))
        .collect();

    let mut world_summary = String::new();
    for (kind, heading) in [
        (EntityKind::Character, "Characters"),
        (EntityKind::Location, "Locations"),
        (EntityKind::Prop, "Props"),
        (EntityKind::Other, "Other"),
    ] {
        let lines: Vec<String> = world.of_kind(kind).map(WorldEntity::summary_line).collect();
        if lines.is_empty() {
            continue;
        }
        world_summary.push_str(&format!("{heading}:\n"));
        for line in lines {
            world_summary.push_str(&format!("- {line}\n"));
        }
    }

    let scene_outline = scenes
        .iter()
        .map(|s| {
            let tags: Vec<&str> = s.declared_tags().collect();
            let purpose = if s.purpose.is_empty() { "(no purpose given)" } else { s.purpose.as_str() };
            if tags.is_empty() {
                format!("Scene {}: {}", s.scene_number, purpose)
            } else {
                format!("Scene {}: {} [{}]", s.scene_number, purpose, tags.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    DerivedSummaries {
        declared_tags,
        tags_by_prefix,
        prop_owners,
        world_summary,
        scene_outline,
        sections: split_sections(script),
    }
}

/// Split a script at its scene headers. Text before the first header is dropped.
pub fn split_sections(script: &str) -> Vec<ScriptSection> {
    let headers: Vec<(usize, u32)> = SECTION_HEADER
        .captures_iter(script)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let number = caps.get(1)?.as_str().parse().ok()?;
            Some((start, number))
        })
        .collect();

    headers
        .iter()
        .enumerate()
        .map(|(i, (start, number))| {
            let end = headers.get(i + 1).map(|(next, _)| *next).unwrap_or(script.len());
            ScriptSection {
                scene_number: *number,
                text: script[*start..end].trim_end().to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::RawEntity;

    fn world() -> RawWorldConfig {
        RawWorldConfig::new()
            .with_character(RawEntity::new("CHAR_MEI", "Mei"))
            .with_location(RawEntity::new("LOC_PIER", "Pier"))
            .with_prop(RawEntity::new("PROP_LANTERN", "Lantern").with_field("owner", "CHAR_MEI"))
    }

    const SCRIPT: &str = "Title\n## Scene 1: Dock\n[CHAR_MEI] waits.\n\n## Scene 2: Storm\nRain on [LOC_PIER].\n";

    #[test]
    fn test_context_derives_summaries() {
        let scenes = vec![
            Scene::new(2, "").with_purpose("Storm hits"),
            Scene::new(1, "").with_characters(["CHAR_MEI"]),
        ];
        let ctx = SharedContext::new("A courier story", SCRIPT, scenes, &world(), TagVocabulary::default())
            .unwrap();

        assert_eq!(ctx.scenes()[0].scene_number, 1);
        assert_eq!(ctx.declared_tags().len(), 3);
        assert_eq!(ctx.derived().prop_owners["PROP_LANTERN"], "CHAR_MEI");
        assert_eq!(ctx.derived().tags_by_prefix["CHAR_"], vec!["CHAR_MEI".to_string()]);
        assert!(ctx.derived().world_summary.contains("Characters:\n- [CHAR_MEI] (Mei)"));
        assert!(ctx.derived().scene_outline.contains("Scene 1: (no purpose given) [CHAR_MEI]"));
        assert!(ctx.derived().scene_outline.contains("Scene 2: Storm hits"));
    }

    #[test]
    fn test_scene_slice_falls_back_to_script_section() {
        let scenes = vec![Scene::new(1, ""), Scene::new(2, "")];
        let ctx = SharedContext::new("", SCRIPT, scenes, &world(), TagVocabulary::default()).unwrap();

        let slice = ctx.scene(2).unwrap();
        assert!(slice.text().starts_with("## Scene 2: Storm"));
        let tags: Vec<&str> = slice.entities().iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["LOC_PIER"]);
        assert!(slice.brief().contains("- [LOC_PIER] (Pier)"));
        assert!(ctx.scene(0).is_none());
        assert!(ctx.scene(3).is_none());
    }

    #[test]
    fn test_context_rejects_usage_errors() {
        let err = SharedContext::new("", SCRIPT, Vec::new(), &world(), TagVocabulary::default());
        assert!(matches!(err, Err(QaError::NoScenes)));

        let gap = vec![Scene::new(1, ""), Scene::new(3, "")];
        let err = SharedContext::new("", SCRIPT, gap, &world(), TagVocabulary::default());
        assert!(matches!(err, Err(QaError::SceneNumbering { .. })));

        let scenes = vec![Scene::new(1, "")];
        let err = SharedContext::new("", SCRIPT, scenes, &RawWorldConfig::new(), TagVocabulary::default());
        assert!(matches!(err, Err(QaError::EmptyWorld)));
    }

    #[test]
    fn test_split_sections() {
        let sections = split_sections(SCRIPT);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].scene_number, 1);
        assert_eq!(sections[0].text, "## Scene 1: Dock\n[CHAR_MEI] waits.");
        assert_eq!(sections[1].scene_number, 2);
    }
}
