//! Tag usage graph ("Constellation" phase).
//!
//! Compares the tags the script references with the tags the world
//! declares, and asks the oracle which relationships the script sets up
//! between them. `owns` relationships are checked against the owners the
//! world declares for its props.

use crate::context::SharedContext;
use crate::gate::OracleGate;
use crate::prompts;
use crate::response::parse_array_lenient;
use crate::tags::suggest_replacement;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

const ORPHAN_PENALTY: f64 = 0.1;
const PHANTOM_PENALTY: f64 = 0.02;
/// Scene count at which a relationship reaches full strength.
const FULL_STRENGTH_SCENES: f64 = 10.0;

/// A relationship between two tags observed in the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRelationship {
    pub source_tag: String,
    pub target_tag: String,
    pub relationship_type: String,
    pub scenes: Vec<u32>,
    /// `min(1, scenes / 10)`.
    pub strength: f64,
}

impl TagRelationship {
    pub fn new(
        source_tag: impl Into<String>,
        target_tag: impl Into<String>,
        relationship_type: impl Into<String>,
        scenes: impl IntoIterator<Item = u32>,
    ) -> Self {
        let scenes: BTreeSet<u32> = scenes.into_iter().collect();
        let strength = (scenes.len() as f64 / FULL_STRENGTH_SCENES).min(1.0);
        Self {
            source_tag: normalize_tag(&source_tag.into()),
            target_tag: normalize_tag(&target_tag.into()),
            relationship_type: relationship_type.into().trim().to_lowercase(),
            scenes: scenes.into_iter().collect(),
            strength,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagIssueKind {
    /// Referenced in the script but not declared.
    Orphan,
    /// An `owns` relationship that contradicts the declared owner.
    InconsistentOwnership,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagIssue {
    pub kind: TagIssueKind,
    pub tag: String,
    pub description: String,
    /// Scenes where the tag appears.
    pub scenes: Vec<u32>,
    /// A declared tag that was probably meant.
    pub suggestion: Option<String>,
}

/// The tag graph of a script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstellationMap {
    /// Canonical tags referenced in the script.
    pub all_tags: BTreeSet<String>,
    pub relationships: Vec<TagRelationship>,
    pub orphan_tags: BTreeSet<String>,
    pub phantom_tags: BTreeSet<String>,
    pub issues: Vec<TagIssue>,
    pub is_valid: bool,
    /// Relationship entries the oracle returned that could not be used.
    pub dropped_relationships: usize,
}

impl ConstellationMap {
    /// `1 - 0.1` per issue `- 0.02` per phantom, floored at zero.
    pub fn score(&self) -> f64 {
        (1.0 - ORPHAN_PENALTY * self.issues.len() as f64 - PHANTOM_PENALTY * self.phantom_tags.len() as f64)
            .max(0.0)
    }
}

/// Relationship entry as the oracle writes it.
#[derive(Debug, Deserialize)]
struct RawRelationship {
    source_tag: String,
    target_tag: String,
    #[serde(default)]
    relationship_type: String,
    #[serde(default)]
    scenes: Vec<Value>,
}

impl RawRelationship {
    fn into_relationship(self) -> Option<TagRelationship> {
        if self.source_tag.trim().is_empty() || self.target_tag.trim().is_empty() {
            return None;
        }
        let scenes: Vec<u32> = self
            .scenes
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect();
        let relationship_type = if self.relationship_type.trim().is_empty() {
            "related_to".to_string()
        } else {
            self.relationship_type
        };
        Some(TagRelationship::new(self.source_tag, self.target_tag, relationship_type, scenes))
    }
}

/// Builds the tag graph for a script.
#[derive(Debug, Clone)]
pub struct TagGraphValidator {
    gate: OracleGate,
}

impl TagGraphValidator {
    pub fn new(gate: OracleGate) -> Self {
        Self { gate }
    }

    /// Map the script's tags and the relationships between them.
    pub async fn map_constellation(&self, context: &SharedContext) -> ConstellationMap {
        let vocabulary = context.vocabulary();
        let declared = context.declared_tags();
        let all_tags = vocabulary.referenced_tags(context.script());

        let orphan_tags: BTreeSet<String> = all_tags.difference(declared).cloned().collect();
        let phantom_tags: BTreeSet<String> = declared.difference(&all_tags).cloned().collect();

        let mut issues: Vec<TagIssue> = orphan_tags
            .iter()
            .map(|tag| orphan_issue(tag, context))
            .collect();

        let (relationships, dropped_relationships) = if all_tags.is_empty() {
            (Vec::new(), 0)
        } else {
            self.relationships(context, &all_tags).await
        };
        issues.extend(ownership_issues(&relationships, context));

        tracing::debug!(
            tags = all_tags.len(),
            orphans = orphan_tags.len(),
            phantoms = phantom_tags.len(),
            relationships = relationships.len(),
            "constellation mapped"
        );

        ConstellationMap {
            is_valid: orphan_tags.is_empty() && issues.is_empty(),
            all_tags,
            relationships,
            orphan_tags,
            phantom_tags,
            issues,
            dropped_relationships,
        }
    }

    async fn relationships(
        &self,
        context: &SharedContext,
        all_tags: &BTreeSet<String>,
    ) -> (Vec<TagRelationship>, usize) {
        let tags = all_tags.iter().cloned().collect::<Vec<_>>().join(", ");
        let prompt = prompts::render(
            prompts::RELATIONSHIPS,
            &[
                ("world", context.derived().world_summary.as_str()),
                ("tags", tags.as_str()),
                ("script", context.script()),
            ],
        );

        let Some(answer) = self.gate.ask("tag relationships", &prompt).await else {
            return (Vec::new(), 0);
        };

        match parse_array_lenient::<RawRelationship>(&answer) {
            Ok((raw, mut dropped)) => {
                let mut relationships: Vec<TagRelationship> = Vec::with_capacity(raw.len());
                for entry in raw {
                    match entry.into_relationship() {
                        Some(rel) => relationships.push(rel),
                        None => dropped += 1,
                    }
                }
                if dropped > 0 {
                    tracing::warn!(dropped, "dropped malformed relationship entries");
                }
                relationships.sort_by(|a, b| {
                    (&a.source_tag, &a.target_tag, &a.relationship_type)
                        .cmp(&(&b.source_tag, &b.target_tag, &b.relationship_type))
                });
                (relationships, dropped)
            }
            Err(failure) => {
                tracing::warn!(reason = %failure.reason, "relationship response unparsable");
                (Vec::new(), 0)
            }
        }
    }
}

fn orphan_issue(tag: &str, context: &SharedContext) -> TagIssue {
    let vocabulary = context.vocabulary();
    let scenes: Vec<u32> = context
        .derived()
        .sections
        .iter()
        .filter(|s| vocabulary.referenced_tags(&s.text).contains(tag))
        .map(|s| s.scene_number)
        .collect();

    let declared = context.declared_tags();
    let suggestion = suggest_replacement(tag, declared.iter().map(String::as_str), vocabulary)
        .or_else(|| {
            let prefix = vocabulary.prefix_of(tag)?;
            declared
                .iter()
                .map(String::as_str)
                .find(|candidate| candidate.starts_with(prefix))
        })
        .map(str::to_string);

    let where_found = if scenes.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = scenes.iter().map(u32::to_string).collect();
        format!(" (scenes {})", list.join(", "))
    };
    TagIssue {
        kind: TagIssueKind::Orphan,
        tag: tag.to_string(),
        description: format!("[{tag}] is used{where_found} but not declared in the world"),
        scenes,
        suggestion,
    }
}

fn ownership_issues(relationships: &[TagRelationship], context: &SharedContext) -> Vec<TagIssue> {
    let owners = &context.derived().prop_owners;
    let vocabulary = context.vocabulary();

    relationships
        .iter()
        .filter(|rel| rel.relationship_type == "owns")
        .filter_map(|rel| {
            // Accept either direction: CHAR owns PROP, or PROP owns CHAR by mistake.
            let (owner, prop) = if vocabulary.prefix_of(&rel.source_tag) == Some("PROP_") {
                (&rel.target_tag, &rel.source_tag)
            } else {
                (&rel.source_tag, &rel.target_tag)
            };
            let expected = owners.get(prop)?;
            if expected == owner {
                return None;
            }
            Some(TagIssue {
                kind: TagIssueKind::InconsistentOwnership,
                tag: prop.clone(),
                description: format!(
                    "script shows [{owner}] owning [{prop}], but the world gives it to [{expected}]"
                ),
                scenes: rel.scenes.clone(),
                suggestion: Some(expected.clone()),
            })
        })
        .collect()
}

fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagVocabulary;
    use crate::testing::{sample_scenes, sample_script, sample_world, ScriptedOracle};
    use crate::world::RawEntity;
    use std::sync::Arc;
    use std::time::Duration;

    fn validator(oracle: ScriptedOracle) -> TagGraphValidator {
        TagGraphValidator::new(OracleGate::new(Arc::new(oracle), 2, Duration::from_secs(5)))
    }

    fn context(script: &str, world: &crate::world::RawWorldConfig) -> SharedContext {
        SharedContext::new("pitch", script, sample_scenes(), world, TagVocabulary::default()).unwrap()
    }

    #[test]
    fn test_strength_saturates() {
        assert_eq!(TagRelationship::new("A", "B", "knows", [1, 2, 3]).strength, 0.3);
        assert_eq!(TagRelationship::new("A", "B", "knows", 1..=25).strength, 1.0);
        let rel = TagRelationship::new("[char_a]", "B", " Owns ", [2, 2, 1]);
        assert_eq!(rel.source_tag, "CHAR_A");
        assert_eq!(rel.relationship_type, "owns");
        assert_eq!(rel.scenes, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_clean_script_is_valid() {
        let ctx = context(&sample_script(), &sample_world());
        let map = validator(ScriptedOracle::new().with_default("[]")).map_constellation(&ctx).await;
        assert!(map.is_valid);
        assert!(map.orphan_tags.is_empty());
        assert!(map.phantom_tags.is_empty());
        assert_eq!(map.all_tags.len(), 5);
        assert_eq!(map.score(), 1.0);
    }

    #[tokio::test]
    async fn test_orphan_disappears_once_declared() {
        let script = format!("{}\n[CHAR_MEII] lurks.", sample_script());
        let ctx = context(&script, &sample_world());
        let map = validator(ScriptedOracle::new()).map_constellation(&ctx).await;

        assert!(map.orphan_tags.contains("CHAR_MEII"));
        assert!(!map.is_valid);
        assert_eq!(map.issues.len(), 1);
        assert_eq!(map.issues[0].scenes, vec![3]);
        assert_eq!(map.issues[0].suggestion.as_deref(), Some("CHAR_MEI"));
        assert!((map.score() - 0.9).abs() < 1e-9);

        let world = sample_world().with_character(RawEntity::new("CHAR_MEII", "Mei's twin"));
        let ctx = context(&script, &world);
        let map = validator(ScriptedOracle::new()).map_constellation(&ctx).await;
        assert!(map.orphan_tags.is_empty());
    }

    #[tokio::test]
    async fn test_phantom_disappears_once_referenced() {
        let world = sample_world().with_location(RawEntity::new("LOC_LIGHTHOUSE", "Lighthouse"));
        let ctx = context(&sample_script(), &world);
        let map = validator(ScriptedOracle::new()).map_constellation(&ctx).await;
        assert!(map.phantom_tags.contains("LOC_LIGHTHOUSE"));
        // Phantoms are reported but are not issues.
        assert!(map.is_valid);
        assert!((map.score() - 0.98).abs() < 1e-9);

        let script = format!("{}\nThe [LOC_LIGHTHOUSE] blinks.", sample_script());
        let ctx = context(&script, &world);
        let map = validator(ScriptedOracle::new()).map_constellation(&ctx).await;
        assert!(map.phantom_tags.is_empty());
    }

    #[tokio::test]
    async fn test_lowercase_tags_are_not_orphans() {
        let script = format!("{}\n[char_bad] appears.", sample_script());
        let ctx = context(&script, &sample_world());
        let map = validator(ScriptedOracle::new()).map_constellation(&ctx).await;
        assert!(map.orphan_tags.is_empty());
    }

    #[tokio::test]
    async fn test_relationships_parsed_tolerantly() {
        let answer = r#"Here you go:
```json
[
  {"source_tag": "CHAR_MEI", "target_tag": "PROP_LANTERN", "relationship_type": "owns", "scenes": [1, 3]},
  {"source_tag": "CHAR_MEI"},
  {"source_tag": "CHAR_OKAFOR", "target_tag": "LOC_PIER", "relationship_type": "located_in", "scenes": ["1"]}
]
```"#;
        let oracle = ScriptedOracle::new().respond_to(prompts::task::RELATIONSHIPS, answer);
        let ctx = context(&sample_script(), &sample_world());
        let map = validator(oracle).map_constellation(&ctx).await;

        assert_eq!(map.relationships.len(), 2);
        assert_eq!(map.dropped_relationships, 1);
        assert_eq!(map.relationships[0].source_tag, "CHAR_MEI");
        assert_eq!(map.relationships[1].scenes, vec![1]);
        assert!(map.is_valid);
    }

    #[tokio::test]
    async fn test_owns_mismatch_is_inconsistent() {
        let answer = r#"[{"source_tag": "CHAR_OKAFOR", "target_tag": "PROP_LANTERN", "relationship_type": "owns", "scenes": [3]}]"#;
        let oracle = ScriptedOracle::new().respond_to(prompts::task::RELATIONSHIPS, answer);
        let ctx = context(&sample_script(), &sample_world());
        let map = validator(oracle).map_constellation(&ctx).await;

        assert_eq!(map.issues.len(), 1);
        assert_eq!(map.issues[0].kind, TagIssueKind::InconsistentOwnership);
        assert_eq!(map.issues[0].suggestion.as_deref(), Some("CHAR_MEI"));
        assert!(!map.is_valid);
    }

    #[tokio::test]
    async fn test_oracle_failure_leaves_no_relationships() {
        let oracle = ScriptedOracle::new().fail_on(prompts::task::RELATIONSHIPS);
        let ctx = context(&sample_script(), &sample_world());
        let map = validator(oracle).map_constellation(&ctx).await;
        assert!(map.relationships.is_empty());
        assert!(map.is_valid);
    }
}
