//! Run configuration.

use crate::tags::{TagVocabulary, DEFAULT_PREFIXES};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One analysis stage of a QA run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Whole-script versus per-scene review.
    Telescope,
    /// Multi-lens panel per scene.
    Inquisitor,
    /// Cross-scene state tracking.
    Continuity,
    /// Tag graph consistency.
    Constellation,
    /// Notation grammar.
    Anchor,
    /// Critique of the script as a whole.
    Mirror,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::Telescope,
        Phase::Inquisitor,
        Phase::Continuity,
        Phase::Constellation,
        Phase::Anchor,
        Phase::Mirror,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Telescope => "telescope",
            Phase::Inquisitor => "inquisitor",
            Phase::Continuity => "continuity",
            Phase::Constellation => "constellation",
            Phase::Anchor => "anchor",
            Phase::Mirror => "mirror",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum score for each phase to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    pub telescope: f64,
    pub inquisitor: f64,
    pub continuity: f64,
    pub constellation: f64,
    pub anchor: f64,
    pub mirror: f64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            telescope: 0.6,
            inquisitor: 0.6,
            continuity: 0.7,
            constellation: 0.8,
            anchor: 0.8,
            mirror: 0.6,
        }
    }
}

impl PhaseThresholds {
    pub fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Telescope => self.telescope,
            Phase::Inquisitor => self.inquisitor,
            Phase::Continuity => self.continuity,
            Phase::Constellation => self.constellation,
            Phase::Anchor => self.anchor,
            Phase::Mirror => self.mirror,
        }
    }

    pub fn set(&mut self, phase: Phase, threshold: f64) {
        let slot = match phase {
            Phase::Telescope => &mut self.telescope,
            Phase::Inquisitor => &mut self.inquisitor,
            Phase::Continuity => &mut self.continuity,
            Phase::Constellation => &mut self.constellation,
            Phase::Anchor => &mut self.anchor,
            Phase::Mirror => &mut self.mirror,
        };
        *slot = threshold.clamp(0.0, 1.0);
    }
}

/// Settings for the generate, critique, refine loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Critique rounds before giving up.
    pub max_iterations: usize,
    /// Critique score that ends the loop early.
    pub target_score: f64,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            target_score: 0.8,
        }
    }
}

/// Configuration for a QA run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Mean phase score needed for the report to pass.
    pub min_overall_score: f64,

    /// Per-phase pass thresholds.
    pub thresholds: PhaseThresholds,

    /// Phases to run. Execution order is always `Phase::ALL` order.
    pub enabled_phases: Vec<Phase>,

    /// Timeout for a single oracle call.
    pub oracle_timeout_secs: u64,

    /// Oracle calls allowed in flight at once.
    pub max_concurrent_oracle_calls: usize,

    /// Timeout for a whole phase. `None` means no limit.
    pub phase_timeout_secs: Option<u64>,

    /// Settings for the refinement loop.
    pub refinement: RefinementConfig,

    /// Tag prefixes in force.
    pub tag_prefixes: TagVocabulary,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            min_overall_score: 0.7,
            thresholds: PhaseThresholds::default(),
            enabled_phases: Phase::ALL
                .into_iter()
                .filter(|p| *p != Phase::Mirror)
                .collect(),
            oracle_timeout_secs: 60,
            max_concurrent_oracle_calls: 4,
            phase_timeout_secs: None,
            refinement: RefinementConfig::default(),
            tag_prefixes: TagVocabulary::new(DEFAULT_PREFIXES),
        }
    }
}

impl QaConfig {
    /// Set the overall pass threshold.
    pub fn with_min_overall_score(mut self, score: f64) -> Self {
        self.min_overall_score = score.clamp(0.0, 1.0);
        self
    }

    /// Set one phase's pass threshold.
    pub fn with_threshold(mut self, phase: Phase, threshold: f64) -> Self {
        self.thresholds.set(phase, threshold);
        self
    }

    /// Run exactly these phases.
    pub fn with_phases(mut self, phases: impl IntoIterator<Item = Phase>) -> Self {
        self.enabled_phases = phases.into_iter().collect();
        self
    }

    /// Enable one more phase.
    pub fn enable(mut self, phase: Phase) -> Self {
        if !self.enabled_phases.contains(&phase) {
            self.enabled_phases.push(phase);
        }
        self
    }

    /// Disable a phase.
    pub fn disable(mut self, phase: Phase) -> Self {
        self.enabled_phases.retain(|p| *p != phase);
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_max_concurrent_oracle_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_oracle_calls = limit.max(1);
        self
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_refinement(mut self, refinement: RefinementConfig) -> Self {
        self.refinement = refinement;
        self
    }

    /// Replace the tag prefix set.
    pub fn with_tag_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_prefixes = TagVocabulary::new(prefixes);
        self
    }

    /// Whether a phase will run.
    pub fn is_enabled(&self, phase: Phase) -> bool {
        self.enabled_phases.contains(&phase)
    }

    /// Enabled phases in execution order, without duplicates.
    pub fn phase_plan(&self) -> Vec<Phase> {
        Phase::ALL
            .into_iter()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.phase_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QaConfig::default();
        assert_eq!(config.min_overall_score, 0.7);
        assert_eq!(config.thresholds.get(Phase::Constellation), 0.8);
        assert!(!config.is_enabled(Phase::Mirror));
        assert_eq!(config.phase_plan().len(), 5);
        assert_eq!(config.refinement.max_iterations, 3);
        assert_eq!(config.tag_prefixes.prefixes().len(), 6);
    }

    #[test]
    fn test_phase_plan_follows_fixed_order() {
        let config = QaConfig::default().with_phases([Phase::Anchor, Phase::Mirror, Phase::Telescope]);
        assert_eq!(config.phase_plan(), vec![Phase::Telescope, Phase::Anchor, Phase::Mirror]);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: QaConfig = serde_json::from_str(
            r#"{"min_overall_score": 0.9, "thresholds": {"anchor": 0.5}, "enabled_phases": ["anchor", "mirror"], "tag_prefixes": ["char", "loc_"]}"#,
        )
        .unwrap();
        assert_eq!(config.min_overall_score, 0.9);
        assert_eq!(config.thresholds.anchor, 0.5);
        assert_eq!(config.thresholds.telescope, 0.6);
        assert_eq!(config.phase_plan(), vec![Phase::Anchor, Phase::Mirror]);
        assert_eq!(config.tag_prefixes.prefixes(), ["CHAR_", "LOC_"]);
        assert_eq!(config.oracle_timeout_secs, 60);
    }

    #[test]
    fn test_builders() {
        let config = QaConfig::default()
            .with_min_overall_score(1.5)
            .with_threshold(Phase::Anchor, 0.3)
            .enable(Phase::Mirror)
            .disable(Phase::Telescope)
            .with_max_concurrent_oracle_calls(0)
            .with_phase_timeout(Duration::from_secs(30));
        assert_eq!(config.min_overall_score, 1.0);
        assert_eq!(config.thresholds.anchor, 0.3);
        assert!(config.is_enabled(Phase::Mirror));
        assert!(!config.is_enabled(Phase::Telescope));
        assert_eq!(config.max_concurrent_oracle_calls, 1);
        assert_eq!(config.phase_timeout(), Some(Duration::from_secs(30)));
    }
}
