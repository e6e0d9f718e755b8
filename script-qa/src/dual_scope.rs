//! Whole-script versus per-scene review ("Telescope" phase).

use crate::context::SharedContext;
use crate::error::PhaseError;
use crate::gate::{fan_out, OracleGate};
use crate::prompts;
use crate::report::Priority;
use crate::response::LabeledBlocks;
use serde::{Deserialize, Serialize};

/// Score used when a parsed response leaves a field out.
const MISSING_SCORE: f64 = 0.5;
/// Coherence and mean scene score further apart than this are a conflict.
const CONFLICT_GAP: f64 = 0.3;

/// Judgment of the script as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideAssessment {
    pub coherence: f64,
    pub flow: f64,
    pub character_consistency: f64,
    pub world_integration: f64,
    pub visual_clarity: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub global_issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// 1 when the oracle answered, 0 when the call failed.
    pub confidence: f64,
    /// The oracle's answer as received.
    pub raw: Option<String>,
}

impl WideAssessment {
    /// The assessment used when the oracle could not be reached.
    pub fn unavailable() -> Self {
        Self {
            coherence: 0.0,
            flow: 0.0,
            character_consistency: 0.0,
            world_integration: 0.0,
            visual_clarity: 0.0,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            global_issues: Vec::new(),
            recommendations: Vec::new(),
            confidence: 0.0,
            raw: None,
        }
    }

    /// Read the labeled template. Missing scores default to 0.5.
    pub fn parse(answer: &str) -> Self {
        let blocks = LabeledBlocks::parse(answer);
        let score = |key: &str| blocks.unit_score(key).unwrap_or(MISSING_SCORE);
        Self {
            coherence: score("COHERENCE"),
            flow: score("FLOW"),
            character_consistency: score("CHARACTER_CONSISTENCY"),
            world_integration: score("WORLD_INTEGRATION"),
            visual_clarity: score("VISUAL_CLARITY"),
            strengths: blocks.list("STRENGTHS"),
            weaknesses: blocks.list("WEAKNESSES"),
            global_issues: blocks.list("GLOBAL_ISSUES"),
            recommendations: blocks.list("RECOMMENDATIONS"),
            confidence: 1.0,
            raw: Some(answer.to_string()),
        }
    }

    /// `0.3 coherence + 0.2 flow + 0.2 character + 0.15 world + 0.15 visual`.
    pub fn weighted(&self) -> f64 {
        0.3 * self.coherence
            + 0.2 * self.flow
            + 0.2 * self.character_consistency
            + 0.15 * self.world_integration
            + 0.15 * self.visual_clarity
    }
}

/// Judgment of one scene on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrowAssessment {
    pub scene_number: u32,
    pub score: f64,
    pub visually_frameable: bool,
    pub character_positions_valid: bool,
    pub world_details_present: bool,
    pub notation_correct: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub confidence: f64,
    pub raw: Option<String>,
}

impl NarrowAssessment {
    pub fn unavailable(scene_number: u32) -> Self {
        Self {
            scene_number,
            score: 0.0,
            visually_frameable: false,
            character_positions_valid: false,
            world_details_present: false,
            notation_correct: false,
            issues: Vec::new(),
            suggestions: Vec::new(),
            confidence: 0.0,
            raw: None,
        }
    }

    /// Read the labeled template. A missing score defaults to 0.5 and a
    /// missing flag to `false`.
    pub fn parse(scene_number: u32, answer: &str) -> Self {
        let blocks = LabeledBlocks::parse(answer);
        let flag = |key: &str| blocks.flag(key).unwrap_or(false);
        Self {
            scene_number,
            score: blocks.unit_score("SCORE").unwrap_or(MISSING_SCORE),
            visually_frameable: flag("VISUALLY_FRAMEABLE"),
            character_positions_valid: flag("CHARACTER_POSITIONS_VALID"),
            world_details_present: flag("WORLD_DETAILS_PRESENT"),
            notation_correct: flag("NOTATION_CORRECT"),
            issues: blocks.list("ISSUES"),
            suggestions: blocks.list("SUGGESTIONS"),
            confidence: 1.0,
            raw: Some(answer.to_string()),
        }
    }
}

/// An issue from either scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedIssue {
    /// `None` for whole-script issues.
    pub scene_number: Option<u32>,
    pub description: String,
}

/// A review request derived from an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub scene_number: Option<u32>,
    pub priority: Priority,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub avg_narrow: f64,
    pub weighted_wide: f64,
    pub overall_quality: f64,
    pub conflicts: Vec<String>,
    /// Global issues first, then by scene.
    pub issues: Vec<ScopedIssue>,
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeAnalysis {
    pub wide: WideAssessment,
    pub narrows: Vec<NarrowAssessment>,
    pub reconciliation: Reconciliation,
}

/// Merge the two scopes into one score and issue list.
///
/// The result does not depend on the order of `narrows`.
pub fn reconcile(wide: &WideAssessment, narrows: &[NarrowAssessment]) -> Reconciliation {
    let mut scores: Vec<f64> = narrows.iter().map(|n| n.score).collect();
    scores.sort_by(f64::total_cmp);
    let avg_narrow = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let weighted_wide = wide.weighted();
    let overall_quality = (0.5 * weighted_wide + 0.5 * avg_narrow).clamp(0.0, 1.0);

    let mut conflicts = Vec::new();
    let gap = (wide.coherence - avg_narrow).abs();
    if gap > CONFLICT_GAP {
        conflicts.push(format!(
            "whole-script coherence {:.2} disagrees with mean scene score {:.2}",
            wide.coherence, avg_narrow
        ));
    }

    let mut issues: Vec<ScopedIssue> = wide
        .global_issues
        .iter()
        .map(|description| ScopedIssue {
            scene_number: None,
            description: description.clone(),
        })
        .chain(narrows.iter().flat_map(|n| {
            n.issues.iter().map(move |description| ScopedIssue {
                scene_number: Some(n.scene_number),
                description: description.clone(),
            })
        }))
        .collect();
    issues.sort();

    let corrections = issues
        .iter()
        .map(|issue| Correction {
            scene_number: issue.scene_number,
            priority: if issue.scene_number.is_none() {
                Priority::High
            } else {
                Priority::Medium
            },
            suggestion: match issue.scene_number {
                Some(n) => format!("Scene {n} needs review: {}", issue.description),
                None => format!("Script needs review: {}", issue.description),
            },
        })
        .collect();

    Reconciliation {
        avg_narrow,
        weighted_wide,
        overall_quality,
        conflicts,
        issues,
        corrections,
    }
}

/// Runs the wide and narrow reviews.
#[derive(Debug, Clone)]
pub struct DualScopeAnalyzer {
    gate: OracleGate,
}

impl DualScopeAnalyzer {
    pub fn new(gate: OracleGate) -> Self {
        Self { gate }
    }

    pub async fn analyze_script(&self, context: &SharedContext) -> Result<TelescopeAnalysis, PhaseError> {
        let derived = context.derived();
        let wide_prompt = prompts::render(
            prompts::WIDE_REVIEW,
            &[
                ("pitch", context.pitch()),
                ("world", derived.world_summary.as_str()),
                ("outline", derived.scene_outline.as_str()),
                ("script", context.script()),
            ],
        );
        let narrow_requests: Vec<(u32, String)> = context
            .scene_slices()
            .map(|slice| {
                let prompt = prompts::render(
                    prompts::NARROW_REVIEW,
                    &[("pitch", context.pitch()), ("scene", slice.brief().as_str())],
                );
                (slice.scene.scene_number, prompt)
            })
            .collect();

        let gate = self.gate.clone();
        let wide = async {
            match self.gate.ask("wide review", &wide_prompt).await {
                Some(answer) => WideAssessment::parse(&answer),
                None => WideAssessment::unavailable(),
            }
        };
        let narrows = fan_out(narrow_requests, move |(scene_number, prompt)| {
            let gate = gate.clone();
            async move {
                match gate.ask("narrow review", &prompt).await {
                    Some(answer) => NarrowAssessment::parse(scene_number, &answer),
                    None => NarrowAssessment::unavailable(scene_number),
                }
            }
        });

        let (wide, narrows) = futures::future::join(wide, narrows).await;
        let narrows = narrows?;
        let reconciliation = reconcile(&wide, &narrows);

        tracing::debug!(
            weighted_wide = reconciliation.weighted_wide,
            avg_narrow = reconciliation.avg_narrow,
            overall = reconciliation.overall_quality,
            conflicts = reconciliation.conflicts.len(),
            "telescope reconciled"
        );

        Ok(TelescopeAnalysis {
            wide,
            narrows,
            reconciliation,
        })
    }
}
