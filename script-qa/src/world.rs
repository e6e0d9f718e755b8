//! World configuration and scene records.
//!
//! World configuration arrives loosely typed (`RawWorldConfig`, whatever the
//! generator produced) and is validated exactly once into `WorldConfig`.
//! Everything downstream consumes only the validated form.

use crate::error::{QaError, QaResult};
use crate::tags::{Tag, TagVocabulary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Attribute keys a prop's expected owner may be stored under.
const OWNER_KEYS: [&str; 3] = ["owner", "owner_tag", "belongs_to"];

// ============================================================================
// Raw input
// ============================================================================

/// World configuration as supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWorldConfig {
    /// Characters (tags must use `CHAR_`).
    #[serde(default)]
    pub characters: Vec<RawEntity>,
    /// Locations (tags must use `LOC_`).
    #[serde(default)]
    pub locations: Vec<RawEntity>,
    /// Props (tags must use `PROP_`).
    #[serde(default)]
    pub props: Vec<RawEntity>,
    /// Concepts, events, environments and any other tagged entity.
    #[serde(default, alias = "concepts")]
    pub other: Vec<RawEntity>,
}

impl RawWorldConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a character.
    pub fn with_character(mut self, entity: RawEntity) -> Self {
        self.characters.push(entity);
        self
    }

    /// Add a location.
    pub fn with_location(mut self, entity: RawEntity) -> Self {
        self.locations.push(entity);
        self
    }

    /// Add a prop.
    pub fn with_prop(mut self, entity: RawEntity) -> Self {
        self.props.push(entity);
        self
    }

    /// Add any other tagged entity.
    pub fn with_other(mut self, entity: RawEntity) -> Self {
        self.other.push(entity);
        self
    }
}

/// A loosely typed world entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Every other field, kept as free text after validation.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawEntity {
    /// Create an entity with a tag and display name.
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            name: Some(name.into()),
            fields: Map::new(),
        }
    }

    /// Attach a free-text field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Validated world
// ============================================================================

/// The list an entity was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Location,
    Prop,
    Other,
}

impl EntityKind {
    /// The name of the input list.
    pub fn list_name(&self) -> &'static str {
        match self {
            EntityKind::Character => "characters",
            EntityKind::Location => "locations",
            EntityKind::Prop => "props",
            EntityKind::Other => "other",
        }
    }

    /// The prefix tags in this list must carry, if fixed.
    pub fn required_prefix(&self) -> Option<&'static str> {
        match self {
            EntityKind::Character => Some("CHAR_"),
            EntityKind::Location => Some("LOC_"),
            EntityKind::Prop => Some("PROP_"),
            EntityKind::Other => None,
        }
    }
}

/// A validated world entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldEntity {
    pub tag: Tag,
    pub name: String,
    pub kind: EntityKind,
    /// Free-text attributes.
    pub attributes: BTreeMap<String, String>,
    /// For props: the character expected to own it.
    pub owner: Option<Tag>,
}

impl WorldEntity {
    /// One-line description for prompts.
    pub fn summary_line(&self) -> String {
        let mut line = format!("{} ({})", self.tag.bracketed(), self.name);
        let details: Vec<String> = self
            .attributes
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        if !details.is_empty() {
            line.push_str(" - ");
            line.push_str(&details.join("; "));
        }
        line
    }
}

/// Validated world configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldConfig {
    entities: Vec<WorldEntity>,
}

impl WorldConfig {
    /// Validate raw input.
    ///
    /// Fails on a missing or malformed tag, a tag in the wrong list, a
    /// duplicate tag, or a world with no entities at all.
    pub fn from_raw(raw: &RawWorldConfig, vocabulary: &TagVocabulary) -> QaResult<Self> {
        let lists = [
            (EntityKind::Character, &raw.characters),
            (EntityKind::Location, &raw.locations),
            (EntityKind::Prop, &raw.props),
            (EntityKind::Other, &raw.other),
        ];

        let mut seen = BTreeSet::new();
        let mut entities = Vec::new();

        for (kind, list) in lists {
            for raw_entity in list.iter() {
                let entity = validate_entity(kind, raw_entity, vocabulary)?;
                if !seen.insert(entity.tag.clone()) {
                    return Err(QaError::DuplicateTag(entity.tag.to_string()));
                }
                entities.push(entity);
            }
        }

        if entities.is_empty() {
            return Err(QaError::EmptyWorld);
        }

        Ok(Self { entities })
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> &[WorldEntity] {
        &self.entities
    }

    /// Entities of one kind.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &WorldEntity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    /// Look up an entity by tag.
    pub fn get(&self, tag: &str) -> Option<&WorldEntity> {
        self.entities.iter().find(|e| e.tag.as_str() == tag)
    }

    /// Number of declared entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entities are declared.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn validate_entity(
    kind: EntityKind,
    raw: &RawEntity,
    vocabulary: &TagVocabulary,
) -> QaResult<WorldEntity> {
    let raw_tag = raw
        .tag
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or(QaError::MissingField {
            list: kind.list_name(),
            field: "tag",
        })?;

    let tag = vocabulary.parse(raw_tag)?;

    if let Some(expected) = kind.required_prefix() {
        if vocabulary.prefixes().iter().any(|p| p == expected) && !tag.as_str().starts_with(expected)
        {
            return Err(QaError::CategoryMismatch {
                tag: tag.to_string(),
                list: kind.list_name(),
                expected,
            });
        }
    }

    let name = raw
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(tag.as_str())
        .to_string();

    let attributes: BTreeMap<String, String> = raw
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), value_to_text(v)))
        .collect();

    let owner = if kind == EntityKind::Prop {
        OWNER_KEYS
            .iter()
            .filter_map(|key| attributes.get(*key))
            .find(|v| !v.trim().is_empty())
            .and_then(|v| match vocabulary.parse(v) {
                Ok(owner) => Some(owner),
                Err(err) => {
                    tracing::warn!(prop = %tag, owner = %v, error = %err, "ignoring unparsable prop owner");
                    None
                }
            })
    } else {
        None
    };

    Ok(WorldEntity {
        tag,
        name,
        kind,
        attributes,
        owner,
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

// ============================================================================
// Scenes
// ============================================================================

/// One scene of the script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// 1-based, contiguous.
    pub scene_number: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub props: Vec<String>,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub entry_state: BTreeMap<String, String>,
    #[serde(default)]
    pub exit_state: BTreeMap<String, String>,
}

impl Scene {
    /// Create a scene with content.
    pub fn new(scene_number: u32, content: impl Into<String>) -> Self {
        Self {
            scene_number,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the declared characters.
    pub fn with_characters<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.characters = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared locations.
    pub fn with_locations<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared props.
    pub fn with_props<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.props = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the scene's purpose.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Add an entry-state entry.
    pub fn with_entry_state(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry_state.insert(key.into(), value.into());
        self
    }

    /// Add an exit-state entry.
    pub fn with_exit_state(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exit_state.insert(key.into(), value.into());
        self
    }

    /// All tags the scene declares.
    pub fn declared_tags(&self) -> impl Iterator<Item = &str> {
        self.characters
            .iter()
            .chain(&self.locations)
            .chain(&self.props)
            .map(String::as_str)
    }
}
