//! Phase results and the final report.

use crate::config::Phase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// How urgently a finding should be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Read a `[HIGH]`, `HIGH:` or bare `high` marker.
    pub fn parse(raw: &str) -> Option<Self> {
        let word = raw
            .trim()
            .trim_matches(|c: char| c == '[' || c == ']' || c == ':')
            .to_lowercase();
        match word.as_str() {
            "high" | "critical" => Some(Priority::High),
            "medium" | "med" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// The outcome of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPhaseResult {
    pub phase: Phase,
    pub passed: bool,
    /// In [0, 1].
    pub score: f64,
    pub issues_found: usize,
    /// Always zero: phases never modify the script.
    pub fixes_applied: usize,
    /// The phase's full analysis.
    pub details: Value,
    /// Why the phase failed, if it did.
    pub error: Option<String>,
}

impl QualityPhaseResult {
    /// A phase that ran to completion.
    pub fn completed(phase: Phase, score: f64, threshold: f64, issues_found: usize, details: Value) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            phase,
            passed: score >= threshold,
            score,
            issues_found,
            fixes_applied: 0,
            details,
            error: None,
        }
    }

    /// A phase that could not finish.
    pub fn failed(phase: Phase, error: impl Into<String>) -> Self {
        Self {
            phase,
            passed: false,
            score: 0.0,
            issues_found: 0,
            fixes_applied: 0,
            details: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Aggregated outcome of a QA run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub run_id: Uuid,
    pub original_script: String,
    /// Identical to `original_script`; the engine only advises.
    pub final_script: String,
    pub phases: Vec<QualityPhaseResult>,
    /// Mean of the phase scores, zero when no phase ran.
    pub overall_score: f64,
    pub min_overall_score: f64,
    pub passed: bool,
}

impl QualityReport {
    /// Build a report from phase results in execution order.
    pub fn new(script: impl Into<String>, phases: Vec<QualityPhaseResult>, min_overall_score: f64) -> Self {
        let script = script.into();
        let overall_score = if phases.is_empty() {
            0.0
        } else {
            phases.iter().map(|p| p.score).sum::<f64>() / phases.len() as f64
        };
        Self {
            run_id: Uuid::new_v4(),
            final_script: script.clone(),
            original_script: script,
            phases,
            overall_score,
            min_overall_score,
            passed: overall_score >= min_overall_score,
        }
    }

    /// The result for one phase, if it ran.
    pub fn phase(&self, phase: Phase) -> Option<&QualityPhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn total_issues(&self) -> usize {
        self.phases.iter().map(|p| p.issues_found).sum()
    }

    /// Phases that did not run to completion.
    pub fn failed_phases(&self) -> impl Iterator<Item = &QualityPhaseResult> {
        self.phases.iter().filter(|p| p.error.is_some())
    }

    /// Plain-text summary, one line per phase.
    pub fn render_summary(&self) -> String {
        let mut out = format!(
            "QA run {}: {} (overall {:.2}, needs {:.2})\n",
            self.run_id,
            if self.passed { "PASSED" } else { "FAILED" },
            self.overall_score,
            self.min_overall_score
        );
        for phase in &self.phases {
            let status = match (&phase.error, phase.passed) {
                (Some(_), _) => "error",
                (None, true) => "pass",
                (None, false) => "fail",
            };
            out.push_str(&format!(
                "  {:<13} {:<5} score {:.2}  issues {}",
                phase.phase.name(),
                status,
                phase.score,
                phase.issues_found
            ));
            if let Some(error) = &phase.error {
                out.push_str(&format!("  ({error})"));
            }
            out.push('\n');
        }
        out
    }
}
