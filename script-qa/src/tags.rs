//! Entity tags and the prefix vocabulary they are drawn from.
//!
//! A tag is an uppercase identifier such as `CHAR_MEI` that names a world
//! entity. In script text it appears bracketed: `[CHAR_MEI]`.

use crate::error::TagError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The prefixes every tag must start with unless a caller overrides them.
pub const DEFAULT_PREFIXES: [&str; 6] = ["CHAR_", "LOC_", "PROP_", "CONCEPT_", "EVENT_", "ENV_"];

/// Shortest shared run of characters that counts as a plausible match.
const MIN_COMMON_RUN: usize = 3;

lazy_static! {
    static ref TAG_MENTION: Regex =
        Regex::new(r"\[(?P<tag>[A-Za-z][A-Za-z0-9]*_[A-Za-z0-9_]+)\]").unwrap();
}

/// The closed set of tag prefixes in use for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagVocabulary {
    prefixes: Vec<String>,
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIXES)
    }
}

impl From<Vec<String>> for TagVocabulary {
    fn from(prefixes: Vec<String>) -> Self {
        Self::new(prefixes)
    }
}

impl From<TagVocabulary> for Vec<String> {
    fn from(vocabulary: TagVocabulary) -> Self {
        vocabulary.prefixes
    }
}

impl TagVocabulary {
    /// Build a vocabulary. Prefixes are uppercased and given a trailing `_`.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| {
                let mut p = p.into().trim().to_uppercase();
                if !p.ends_with('_') {
                    p.push('_');
                }
                p
            })
            .filter(|p| p.len() > 1)
            .collect();
        // Longest first so that overlapping prefixes resolve to the most specific.
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes.dedup();
        Self { prefixes }
    }

    /// All prefixes, longest first.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// The prefix a tag starts with (case-sensitive).
    pub fn prefix_of(&self, tag: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|p| tag.starts_with(p.as_str()))
            .map(String::as_str)
    }

    /// The prefix a tag starts with, ignoring case.
    pub fn prefix_of_ignore_case(&self, tag: &str) -> Option<&str> {
        let upper = tag.to_uppercase();
        self.prefixes
            .iter()
            .find(|p| upper.starts_with(p.as_str()))
            .map(String::as_str)
    }

    /// Parse a tag, with or without surrounding brackets.
    pub fn parse(&self, raw: &str) -> Result<Tag, TagError> {
        let trimmed = raw.trim();
        let bare = trimmed
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .unwrap_or(trimmed);

        if bare.is_empty() {
            return Err(TagError::Empty);
        }
        if !bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(TagError::InvalidCharacters(bare.to_string()));
        }
        let prefix = self
            .prefix_of_ignore_case(bare)
            .ok_or_else(|| TagError::UnknownPrefix(bare.to_string()))?;
        if bare.len() == prefix.len() {
            return Err(TagError::MissingName(bare.to_string()));
        }
        let canonical = bare.to_uppercase();
        if canonical != bare {
            return Err(TagError::NotCanonical {
                found: bare.to_string(),
                canonical,
            });
        }
        Ok(Tag(canonical))
    }

    /// Every bracketed tag-shaped token in `text` whose prefix is known.
    pub fn mentions<'a>(&'a self, text: &'a str) -> impl Iterator<Item = TagMention<'a>> + 'a {
        TAG_MENTION.captures_iter(text).filter_map(move |caps| {
            let whole = caps.get(0)?;
            let tag = caps.name("tag")?;
            self.prefix_of_ignore_case(tag.as_str())?;
            Some(TagMention {
                text: tag.as_str(),
                start: whole.start(),
                end: whole.end(),
            })
        })
    }

    /// The set of canonical tags referenced in `text`.
    ///
    /// Tags that are not in canonical uppercase are left out: they are a
    /// formatting problem, not a reference.
    pub fn referenced_tags(&self, text: &str) -> BTreeSet<String> {
        self.mentions(text)
            .filter(TagMention::is_canonical)
            .map(|m| m.text.to_string())
            .collect()
    }
}

/// A bracketed tag occurrence inside some text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMention<'a> {
    /// The tag text without brackets, as written.
    pub text: &'a str,
    /// Byte offset of the opening bracket.
    pub start: usize,
    /// Byte offset just past the closing bracket.
    pub end: usize,
}

impl TagMention<'_> {
    /// Whether the tag is written in canonical uppercase.
    pub fn is_canonical(&self) -> bool {
        self.text.chars().all(|c| !c.is_ascii_lowercase())
    }

    /// The canonical uppercase spelling.
    pub fn canonical(&self) -> String {
        self.text.to_uppercase()
    }
}

/// A validated, canonical tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// The bare tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag as it appears in script text.
    pub fn bracketed(&self) -> String {
        format!("[{}]", self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Find the known tag most likely meant by `unknown`.
///
/// Only candidates sharing the unknown tag's prefix are considered.
/// Containment in either direction wins, preferring the closest length;
/// otherwise the candidate with the longest shared run of characters
/// (at least three) is returned.
pub fn suggest_replacement<'a, I>(
    unknown: &str,
    candidates: I,
    vocabulary: &TagVocabulary,
) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let unknown = unknown.to_uppercase();
    let prefix = vocabulary.prefix_of(&unknown)?;
    let unknown_name = &unknown[prefix.len()..];

    let same_prefix: Vec<&'a str> = candidates
        .into_iter()
        .filter(|c| c.starts_with(prefix) && *c != unknown)
        .collect();

    let contained = same_prefix
        .iter()
        .copied()
        .filter(|c| {
            let name = &c[prefix.len()..];
            !name.is_empty() && (name.contains(unknown_name) || unknown_name.contains(name))
        })
        .min_by_key(|c| (c.len().abs_diff(unknown.len()), *c));
    if let Some(found) = contained {
        return Some(found);
    }

    same_prefix
        .into_iter()
        .map(|c| (longest_common_run(&c[prefix.len()..], unknown_name), c))
        .filter(|(run, _)| *run >= MIN_COMMON_RUN)
        .max_by(|(a, ca), (b, cb)| a.cmp(b).then_with(|| cb.cmp(ca)))
        .map(|(_, c)| c)
}

/// Length of the longest run of characters shared by `a` and `b`.
fn longest_common_run(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut best = 0;
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                row[j] = prev[j - 1] + 1;
                best = best.max(row[j]);
            }
        }
        prev = row;
    }
    best
}
