//! Notation grammar checks ("Anchor" phase).
//!
//! The script carries four token families inside its prose:
//!
//! ```text
//! ## Scene 1: Arrival
//! (/scene_frame_chunk_start/)
//! [1.1.cA] (Wide)
//! [CHAR_MEI] steps onto [LOC_PIER].
//! (/scene_frame_chunk_end/)
//! ```
//!
//! The validator walks the script line by line with a small state machine
//! and reports every deviation together with the text it would expect in
//! its place. It never rewrites the script.

use crate::tags::{suggest_replacement, TagVocabulary};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const CHUNK_START: &str = "(/scene_frame_chunk_start/)";
pub const CHUNK_END: &str = "(/scene_frame_chunk_end/)";

/// Score lost per notation issue.
const ISSUE_PENALTY: f64 = 0.05;

lazy_static! {
    static ref SCENE_MARKER: Regex =
        Regex::new(r"^## Scene (?P<number>[1-9]\d*):(?P<title>.*)$").unwrap();
    static ref SCENE_HEADER_LIKE: Regex = Regex::new(
        r"(?i)^[ \t]*#+[ \t]*scene[ \t]*(?P<number>\d+)[ \t]*[:.\-]?(?P<title>.*)$"
    )
    .unwrap();
    static ref CAMERA_TOKEN: Regex = Regex::new(
        r"\[(?P<scene>\d+)\.(?P<frame>\d+)(?P<rest>[^\]\s]*)\](?:[ \t]*\((?P<shot>[^)\n]*)\))?"
    )
    .unwrap();
    static ref CAMERA_SUFFIX: Regex = Regex::new(r"^\.c(?P<letter>[A-Z])$").unwrap();
    static ref CHUNK_DELIMITER: Regex =
        Regex::new(r"\(/scene_frame_chunk_(?P<kind>start|end)/\)").unwrap();
}

/// Token family an issue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotationCategory {
    SceneMarker,
    CameraBlock,
    TagFormat,
    FrameChunk,
}

impl fmt::Display for NotationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotationCategory::SceneMarker => "scene_marker",
            NotationCategory::CameraBlock => "camera_block",
            NotationCategory::TagFormat => "tag_format",
            NotationCategory::FrameChunk => "frame_chunk",
        };
        f.write_str(name)
    }
}

/// One notation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotationIssue {
    /// 1-based line number.
    pub line: usize,
    pub category: NotationCategory,
    pub description: String,
    /// The offending text as written.
    pub current: String,
    /// Replacement text, empty when there is nothing sensible to suggest.
    pub suggestion: String,
}

/// A suggested replacement. Never applied by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotationFix {
    pub line: usize,
    pub category: NotationCategory,
    pub current: String,
    pub suggestion: String,
}

impl From<&NotationIssue> for NotationFix {
    fn from(issue: &NotationIssue) -> Self {
        Self {
            line: issue.line,
            category: issue.category,
            current: issue.current.clone(),
            suggestion: issue.suggestion.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotationReport {
    pub issues: Vec<NotationIssue>,
    pub fixes: Vec<NotationFix>,
    pub valid: bool,
    pub scene_count: usize,
    pub camera_count: usize,
}

impl NotationReport {
    /// `1 - 0.05` per issue, floored at zero.
    pub fn score(&self) -> f64 {
        (1.0 - ISSUE_PENALTY * self.issues.len() as f64).max(0.0)
    }

    /// Issues of one category.
    pub fn issues_in(&self, category: NotationCategory) -> impl Iterator<Item = &NotationIssue> {
        self.issues.iter().filter(move |i| i.category == category)
    }
}

/// Checks scene markers, camera blocks, tag references and frame chunks.
#[derive(Debug, Clone, Default)]
pub struct NotationValidator {
    vocabulary: TagVocabulary,
}

impl NotationValidator {
    pub fn new(vocabulary: TagVocabulary) -> Self {
        Self { vocabulary }
    }

    /// Validate `script` against the set of known tags.
    pub fn validate(&self, script: &str, world_tags: &BTreeSet<String>) -> NotationReport {
        let mut scan = Scan::new(&self.vocabulary, world_tags);
        for (index, line) in script.lines().enumerate() {
            scan.line(index + 1, line);
        }
        scan.finish()
    }
}

/// Camera sequencing within the open scene.
#[derive(Debug, Clone, Copy)]
struct LastCamera {
    frame: u32,
    letter: char,
}

/// Scanner state for one pass over a script.
struct Scan<'a> {
    vocabulary: &'a TagVocabulary,
    world_tags: &'a BTreeSet<String>,
    issues: Vec<NotationIssue>,
    expected_scene: u32,
    open_scene: Option<u32>,
    last_camera: Option<LastCamera>,
    open_chunk: Option<(usize, String)>,
    scene_count: usize,
    camera_count: usize,
}

impl<'a> Scan<'a> {
    fn new(vocabulary: &'a TagVocabulary, world_tags: &'a BTreeSet<String>) -> Self {
        Self {
            vocabulary,
            world_tags,
            issues: Vec::new(),
            expected_scene: 1,
            open_scene: None,
            last_camera: None,
            open_chunk: None,
            scene_count: 0,
            camera_count: 0,
        }
    }

    fn issue(
        &mut self,
        line: usize,
        category: NotationCategory,
        description: impl Into<String>,
        current: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        self.issues.push(NotationIssue {
            line,
            category,
            description: description.into(),
            current: current.into(),
            suggestion: suggestion.into(),
        });
    }

    fn line(&mut self, number: usize, line: &str) {
        self.scene_marker(number, line);
        self.chunk_delimiters(number, line);
        self.camera_blocks(number, line);
        self.tag_references(number, line);
    }

    fn scene_marker(&mut self, number: usize, line: &str) {
        if let Some(caps) = SCENE_MARKER.captures(line) {
            let title = caps.name("title").map_or("", |m| m.as_str());
            let expected = self.expected_scene;
            let Some(written) = caps.name("number").and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                self.issue(
                    number,
                    NotationCategory::SceneMarker,
                    format!("scene number is out of range; expected scene {expected}"),
                    line,
                    format!("## Scene {expected}:{title}"),
                );
                self.open_new_scene(number, expected);
                return;
            };
            let scene = if written == expected {
                written
            } else if written > expected {
                self.issue(
                    number,
                    NotationCategory::SceneMarker,
                    format!("scene {written} skips scene {expected}"),
                    line,
                    format!("## Scene {expected}:{title}"),
                );
                // Trust the written number after a gap.
                written
            } else {
                self.issue(
                    number,
                    NotationCategory::SceneMarker,
                    format!("scene {written} repeats or goes backwards; expected scene {expected}"),
                    line,
                    format!("## Scene {expected}:{title}"),
                );
                expected
            };
            self.open_new_scene(number, scene);
            return;
        }

        if let Some(caps) = SCENE_HEADER_LIKE.captures(line) {
            let expected = self.expected_scene;
            let title = caps.name("title").map_or("", |m| m.as_str().trim());
            let suggestion = if title.is_empty() {
                format!("## Scene {expected}:")
            } else {
                format!("## Scene {expected}: {title}")
            };
            self.issue(
                number,
                NotationCategory::SceneMarker,
                "malformed scene marker",
                line,
                suggestion,
            );
            self.open_new_scene(number, expected);
        }
    }

    fn open_new_scene(&mut self, number: usize, scene: u32) {
        if let Some((opened_at, text)) = self.open_chunk.take() {
            self.issue(
                opened_at,
                NotationCategory::FrameChunk,
                format!("frame chunk opened on line {opened_at} is still open at the scene marker on line {number}"),
                text,
                CHUNK_END,
            );
        }
        self.open_scene = Some(scene);
        self.expected_scene = scene.saturating_add(1);
        self.last_camera = None;
        self.scene_count += 1;
    }

    fn chunk_delimiters(&mut self, number: usize, line: &str) {
        for caps in CHUNK_DELIMITER.captures_iter(line) {
            let is_start = caps.name("kind").is_some_and(|k| k.as_str() == "start");
            if is_start {
                if let Some(opened_at) = self.open_chunk.as_ref().map(|(at, _)| *at) {
                    self.issue(
                        number,
                        NotationCategory::FrameChunk,
                        format!("nested frame chunk; the chunk opened on line {opened_at} is not closed"),
                        line,
                        format!("{CHUNK_END}\n{CHUNK_START}"),
                    );
                }
                self.open_chunk = Some((number, line.to_string()));
            } else if self.open_chunk.take().is_none() {
                self.issue(
                    number,
                    NotationCategory::FrameChunk,
                    "frame chunk end without a matching start",
                    line,
                    "",
                );
            }
        }
    }

    fn camera_blocks(&mut self, number: usize, line: &str) {
        for caps in CAMERA_TOKEN.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            let token = whole.as_str();
            let (Some(written_scene), Some(frame)) = (
                caps.name("scene").and_then(|m| m.as_str().parse::<u32>().ok()),
                caps.name("frame").and_then(|m| m.as_str().parse::<u32>().ok()),
            ) else {
                continue;
            };
            self.camera_count += 1;

            let letter = caps
                .name("rest")
                .and_then(|rest| CAMERA_SUFFIX.captures(rest.as_str()))
                .and_then(|c| c.name("letter"))
                .and_then(|m| m.as_str().chars().next());
            let shot = caps
                .name("shot")
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty());

            // `None` once a frame has used up `cZ`.
            let expected_letter = match self.last_camera {
                Some(last) if last.frame == frame => next_letter(last.letter),
                _ => Some('A'),
            };
            let scene = self.open_scene.unwrap_or(written_scene);
            let suggestion = expected_letter
                .map(|expected| {
                    let block = format!("[{scene}.{frame}.c{expected}]");
                    match shot {
                        Some(shot) => format!("{block} ({shot})"),
                        None => block,
                    }
                })
                .unwrap_or_default();

            match letter {
                None => self.issue(
                    number,
                    NotationCategory::CameraBlock,
                    "malformed camera block; expected [scene.frame.cLETTER]",
                    token,
                    suggestion,
                ),
                Some(letter) => {
                    if self.open_scene.is_none() {
                        self.issue(
                            number,
                            NotationCategory::CameraBlock,
                            "camera block before any scene marker",
                            token,
                            "",
                        );
                    } else if written_scene != scene {
                        self.issue(
                            number,
                            NotationCategory::CameraBlock,
                            format!("camera block names scene {written_scene} inside scene {scene}"),
                            token,
                            suggestion,
                        );
                    } else if let Some(expected) = expected_letter.filter(|e| *e != letter) {
                        self.issue(
                            number,
                            NotationCategory::CameraBlock,
                            format!("camera letter {letter} out of sequence; expected {expected}"),
                            token,
                            suggestion,
                        );
                    } else if expected_letter.is_none() {
                        self.issue(
                            number,
                            NotationCategory::CameraBlock,
                            format!("camera letter {letter} follows cZ; frame {frame} has no letters left"),
                            token,
                            "",
                        );
                    }
                    if shot.is_none() {
                        self.issue(
                            number,
                            NotationCategory::CameraBlock,
                            "camera block has no shot type",
                            token,
                            "",
                        );
                    }
                    self.last_camera = Some(LastCamera { frame, letter });
                }
            }
        }
    }

    fn tag_references(&mut self, number: usize, line: &str) {
        let mentions: Vec<_> = self.vocabulary.mentions(line).collect();
        for mention in mentions {
            let written = format!("[{}]", mention.text);
            if !mention.is_canonical() {
                self.issue(
                    number,
                    NotationCategory::TagFormat,
                    format!("tag {written} is not uppercase"),
                    written,
                    format!("[{}]", mention.canonical()),
                );
                continue;
            }
            if self.world_tags.contains(mention.text) {
                continue;
            }
            let suggestion = suggest_replacement(
                mention.text,
                self.world_tags.iter().map(String::as_str),
                self.vocabulary,
            )
            .map(|tag| format!("[{tag}]"))
            .unwrap_or_default();
            self.issue(
                number,
                NotationCategory::TagFormat,
                format!("tag {written} is not declared in the world"),
                written,
                suggestion,
            );
        }
    }

    fn finish(mut self) -> NotationReport {
        if let Some((opened_at, text)) = self.open_chunk.take() {
            self.issue(
                opened_at,
                NotationCategory::FrameChunk,
                format!("frame chunk opened on line {opened_at} is never closed"),
                text,
                CHUNK_END,
            );
        }

        let fixes = self
            .issues
            .iter()
            .filter(|i| !i.suggestion.is_empty())
            .map(NotationFix::from)
            .collect();

        tracing::debug!(
            issues = self.issues.len(),
            scenes = self.scene_count,
            cameras = self.camera_count,
            "notation scan finished"
        );

        NotationReport {
            valid: self.issues.is_empty(),
            issues: self.issues,
            fixes,
            scene_count: self.scene_count,
            camera_count: self.camera_count,
        }
    }
}

fn next_letter(letter: char) -> Option<char> {
    if letter >= 'Z' {
        return None;
    }
    char::from_u32(letter as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_script;

    fn world_tags() -> BTreeSet<String> {
        ["CHAR_MEI", "CHAR_OKAFOR", "LOC_PIER", "LOC_MARKET", "PROP_LANTERN"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn validate(script: &str) -> NotationReport {
        NotationValidator::default().validate(script, &world_tags())
    }

    #[test]
    fn test_clean_script_has_no_issues() {
        let report = validate(&sample_script());
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert!(report.valid);
        assert_eq!(report.scene_count, 3);
        assert_eq!(report.camera_count, 6);
        assert_eq!(report.score(), 1.0);
    }

    #[test]
    fn test_scene_gap_suggests_missing_number() {
        let script = "## Scene 1: Start\n[1.1.cA] (Wide)\n## Scene 3: Later\n[3.1.cA] (Wide)";
        let report = validate(script);

        let markers: Vec<_> = report.issues_in(NotationCategory::SceneMarker).collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].line, 3);
        assert_eq!(markers[0].suggestion, "## Scene 2: Later");
        assert!(markers[0].suggestion.starts_with("## Scene 2:"));
        // The written number is trusted, so the camera block matches.
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_repeated_scene_assumes_expected_number() {
        let script = "## Scene 1: A\n## Scene 1: B\n[2.1.cA] (Wide)\n## Scene 3: C";
        let report = validate(script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].suggestion, "## Scene 2: B");
    }

    #[test]
    fn test_malformed_header_gets_canonical_suggestion() {
        let script = "## Scene 1: A\n### scene 2 - The Docks\n[2.1.cA] (Wide)";
        let report = validate(script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].category, NotationCategory::SceneMarker);
        assert_eq!(report.issues[0].suggestion, "## Scene 2: The Docks");
    }

    #[test]
    fn test_out_of_range_scene_numbers() {
        let report = validate("## Scene 1: A\n## Scene 99999999999: B\n[2.1.cA] (Wide)");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].category, NotationCategory::SceneMarker);
        assert_eq!(report.issues[0].suggestion, "## Scene 2: B");
        assert_eq!(report.scene_count, 2);

        let report = validate("## Scene 4294967295: End");
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].suggestion, "## Scene 1: End");
        assert_eq!(report.scene_count, 1);
    }

    #[test]
    fn test_camera_letters_reset_per_frame() {
        let script = "## Scene 1:\n[1.1.cA] (Wide)\n[1.1.cB] (Close)\n[1.2.cA] (Wide)\n[1.2.cB] (Close)";
        assert!(validate(script).valid);
    }

    #[test]
    fn test_camera_letter_out_of_sequence() {
        let script = "## Scene 1:\n[1.1.cA] (Wide)\n[1.1.cC] (Close)\n[1.1.cD] (Close)";
        let report = validate(script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, 3);
        assert_eq!(report.issues[0].suggestion, "[1.1.cB] (Close)");
    }

    #[test]
    fn test_camera_letters_stop_at_z() {
        let mut script = String::from("## Scene 1:");
        for letter in 'A'..='Z' {
            script.push_str(&format!("\n[1.1.c{letter}] (Wide)"));
        }
        script.push_str("\n[1.1.cA] (Wide)");

        let report = validate(&script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].line, 28);
        assert_eq!(report.issues[0].current, "[1.1.cA] (Wide)");
        assert!(report.issues[0].suggestion.is_empty());
        assert!(report.fixes.is_empty());
    }

    #[test]
    fn test_camera_new_frame_must_start_at_a() {
        let script = "## Scene 1:\n[1.1.cA] (Wide)\n[1.2.cB] (Wide)";
        let report = validate(script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].suggestion, "[1.2.cA] (Wide)");
    }

    #[test]
    fn test_camera_scene_mismatch() {
        let script = "## Scene 1:\n[2.1.cA] (Wide)";
        let report = validate(script);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].suggestion, "[1.1.cA] (Wide)");
    }

    #[test]
    fn test_camera_missing_shot_and_malformed_token() {
        let script = "## Scene 1:\n[1.1.cA]\n[1.2.ca] (Wide)";
        let report = validate(script);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].description, "camera block has no shot type");
        assert!(report.issues[0].suggestion.is_empty());
        assert_eq!(report.issues[1].suggestion, "[1.2.cA] (Wide)");
        assert_eq!(report.fixes.len(), 1);
    }

    #[test]
    fn test_lowercase_tag_yields_one_issue() {
        let script = "## Scene 1:\n[char_bad] waits on the [LOC_PIER].";
        let report = validate(script);
        let tags: Vec<_> = report.issues_in(NotationCategory::TagFormat).collect();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].current, "[char_bad]");
        assert_eq!(tags[0].suggestion, "[CHAR_BAD]");
    }

    #[test]
    fn test_unknown_tag_gets_nearest_match() {
        let script = "## Scene 1:\n[CHAR_MEI_CHEN] and [LOC_NOWHERE] meet.";
        let report = validate(script);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].suggestion, "[CHAR_MEI]");
        assert!(report.issues[1].suggestion.is_empty());
        assert_eq!(report.fixes.len(), 1);
    }

    #[test]
    fn test_unknown_prefix_is_not_a_tag() {
        let script = "## Scene 1:\n[NOTE_TO_SELF] ignored.";
        assert!(validate(script).valid);
    }

    #[test]
    fn test_frame_chunk_problems() {
        let script = [
            "## Scene 1:",
            CHUNK_START,
            CHUNK_START,
            CHUNK_END,
            CHUNK_END,
            CHUNK_START,
            "## Scene 2:",
            CHUNK_START,
        ]
        .join("\n");
        let report = validate(&script);
        let chunks: Vec<_> = report.issues_in(NotationCategory::FrameChunk).collect();
        let lines: Vec<usize> = chunks.iter().map(|i| i.line).collect();
        // Nested open, unmatched close, open across a marker, unclosed at the end.
        assert_eq!(lines, vec![3, 5, 6, 8]);
        assert_eq!(chunks[3].suggestion, CHUNK_END);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let script = "[char_a] ".repeat(30);
        let report = validate(&script);
        assert_eq!(report.issues.len(), 30);
        assert_eq!(report.score(), 0.0);
    }
}
