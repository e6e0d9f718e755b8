//! Tolerant parsing of oracle output.
//!
//! The oracle returns text in whatever shape it likes: a bare JSON value,
//! JSON wrapped in a markdown fence, JSON buried in prose, or labeled
//! `KEY: value` blocks. Nothing here fails loudly; callers get `None` or a
//! `ParseFailure` that keeps the raw text for audit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw oracle output that could not be parsed into the expected shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

/// Strip a markdown code fence if the text has one.
pub fn strip_fence(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

/// The first balanced `open ... close` span in `text`.
///
/// Brackets inside JSON string literals are ignored.
pub fn first_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// The first balanced JSON object in `text`.
pub fn extract_object(text: &str) -> Option<&str> {
    first_balanced(strip_fence(text), '{', '}')
}

/// The first balanced JSON array in `text`.
pub fn extract_array(text: &str) -> Option<&str> {
    first_balanced(strip_fence(text), '[', ']')
}

/// Parse the first JSON object in `text` into `T`.
pub fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T, ParseFailure> {
    let json = extract_object(text).ok_or_else(|| ParseFailure {
        reason: "no JSON object found".to_string(),
        raw: text.to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| ParseFailure {
        reason: e.to_string(),
        raw: text.to_string(),
    })
}

/// Parse the first JSON array in `text`, keeping only entries that fit `T`.
///
/// Returns the parsed entries and how many were dropped.
pub fn parse_array_lenient<T: DeserializeOwned>(text: &str) -> Result<(Vec<T>, usize), ParseFailure> {
    let json = extract_array(text).ok_or_else(|| ParseFailure {
        reason: "no JSON array found".to_string(),
        raw: text.to_string(),
    })?;
    let values: Vec<serde_json::Value> = serde_json::from_str(json).map_err(|e| ParseFailure {
        reason: e.to_string(),
        raw: text.to_string(),
    })?;

    let total = values.len();
    let parsed: Vec<T> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    let dropped = total - parsed.len();
    Ok((parsed, dropped))
}

// ============================================================================
// Labeled blocks
// ============================================================================

/// `KEY: value` blocks with optional `- item` lists under each key.
///
/// ```text
/// COHERENCE: 0.8
/// STRENGTHS:
/// - vivid imagery
/// - tight pacing
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledBlocks {
    scalars: BTreeMap<String, String>,
    lists: BTreeMap<String, Vec<String>>,
}

impl LabeledBlocks {
    /// Parse labeled blocks. Keys are matched case-insensitively.
    pub fn parse(text: &str) -> Self {
        let mut blocks = Self::default();
        let mut current: Option<String> = None;

        for line in strip_fence(text).lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some((key, value)) = split_label(trimmed) {
                let value = value.trim();
                if !value.is_empty() {
                    blocks.scalars.insert(key.clone(), value.to_string());
                }
                blocks.lists.entry(key.clone()).or_default();
                current = Some(key);
                continue;
            }

            if let Some(key) = &current {
                let item = trimmed
                    .trim_start_matches(['-', '*', '•'])
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .trim_start_matches(['.', ')'])
                    .trim();
                if !item.is_empty() && !is_placeholder(item) {
                    blocks.lists.entry(key.clone()).or_default().push(item.to_string());
                }
            }
        }

        blocks
    }

    /// Whether no labels were found.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Whether a label is present.
    pub fn has(&self, key: &str) -> bool {
        self.lists.contains_key(&normalize_key(key))
    }

    /// The inline value after a label.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.scalars.get(&normalize_key(key)).map(String::as_str)
    }

    /// The list items under a label. An inline value counts as one item.
    pub fn list(&self, key: &str) -> Vec<String> {
        let key = normalize_key(key);
        let mut items = Vec::new();
        if let Some(inline) = self.scalars.get(&key) {
            if !is_placeholder(inline) {
                items.push(inline.clone());
            }
        }
        if let Some(list) = self.lists.get(&key) {
            items.extend(list.iter().cloned());
        }
        items
    }

    /// A score normalized to [0, 1].
    pub fn unit_score(&self, key: &str) -> Option<f64> {
        self.scalar(key).and_then(parse_unit_score)
    }

    /// A yes/no flag.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.scalar(key).and_then(parse_flag)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .trim_matches('*')
        .trim()
        .to_uppercase()
        .replace([' ', '-'], "_")
}

/// Split `KEY: value` when KEY looks like a label (letters, spaces, `_`).
fn split_label(line: &str) -> Option<(String, &str)> {
    let line = line.trim_start_matches('#').trim();
    let (key, value) = line.split_once(':')?;
    let key_clean = key.trim().trim_matches('*').trim();
    if key_clean.is_empty() || key_clean.len() > 40 {
        return None;
    }
    if !key_clean.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    let is_label = key_clean
        .chars()
        .all(|c| c.is_ascii_uppercase() || c == '_' || c == ' ' || c == '-')
        && key_clean.chars().any(|c| c.is_ascii_uppercase());
    if !is_label {
        return None;
    }
    Some((normalize_key(key_clean), value))
}

fn is_placeholder(item: &str) -> bool {
    matches!(
        item.trim().to_lowercase().as_str(),
        "none" | "n/a" | "na" | "-" | "nothing" | "none found" | "no issues"
    )
}

/// Parse `0.8`, `8/10`, `80%` or `4/5` into [0, 1].
pub fn parse_unit_score(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let leading: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '/' || *c == '%' || *c == ' ')
        .collect();
    let leading = leading.trim();

    let value = if let Some((num, den)) = leading.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else if let Some(pct) = leading.strip_suffix('%') {
        pct.trim().parse::<f64>().ok()? / 100.0
    } else {
        let value: f64 = leading.split_whitespace().next()?.parse().ok()?;
        if value > 10.0 {
            value / 100.0
        } else if value > 1.0 {
            value / 10.0
        } else {
            value
        }
    };

    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Parse a leading number without normalizing it.
pub fn parse_number(raw: &str) -> Option<f64> {
    let leading: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    leading.parse().ok().filter(|v: &f64| v.is_finite())
}

/// Parse yes/no style answers.
pub fn parse_flag(raw: &str) -> Option<bool> {
    let word: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "yes" | "true" | "y" | "pass" | "valid" | "correct" => Some(true),
        "no" | "false" | "n" | "fail" | "invalid" | "incorrect" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Field deserializers for oracle-written JSON
// ============================================================================

/// `null` becomes the type's default.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A boolean written as `true`, `"yes"`, `1` or `null` (false).
pub fn loose_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(text) => parse_flag(&text).unwrap_or(false),
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    })
}

/// An integer written as `3`, `3.0` or `"3"`. Anything else is `None`.
pub fn loose_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_to_int)),
        Value::String(text) => parse_number(&text).and_then(float_to_int),
        _ => None,
    };
    Ok(value)
}

fn float_to_int(value: f64) -> Option<i64> {
    let rounded = value.round();
    (rounded.is_finite() && rounded.abs() < i64::MAX as f64).then_some(rounded as i64)
}

/// A string list written as an array, a single string, or `null`.
/// Non-string items are dropped.
pub fn loose_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                _ => None,
            })
            .collect(),
        Value::String(text) if !text.trim().is_empty() && !is_placeholder(&text) => vec![text],
        _ => Vec::new(),
    })
}
