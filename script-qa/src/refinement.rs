//! Generate, critique, refine ("Mirror" phase).
//!
//! The loop is usable on its own for ad hoc drafting. Inside a QA run only
//! `critique` is used: the engine never replaces the script it was given.

use crate::config::RefinementConfig;
use crate::gate::OracleGate;
use crate::prompts;
use crate::response::LabeledBlocks;
use serde::{Deserialize, Serialize};

/// A critique of one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// In [0, 1]; zero when the oracle did not answer.
    pub score: f64,
    pub points: Vec<String>,
    pub answered: bool,
    pub raw: Option<String>,
}

impl Critique {
    fn unanswered() -> Self {
        Self {
            score: 0.0,
            points: Vec::new(),
            answered: false,
            raw: None,
        }
    }

    fn parse(answer: &str) -> Self {
        let blocks = LabeledBlocks::parse(answer);
        Self {
            score: blocks.unit_score("SCORE").unwrap_or(0.0),
            points: blocks.list("CRITIQUE"),
            answered: true,
            raw: Some(answer.to_string()),
        }
    }
}

/// One draft and its critique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementStep {
    /// 1-based.
    pub iteration: usize,
    pub draft: String,
    pub critique: Critique,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub steps: Vec<RefinementStep>,
    /// Whether a critique reached the target score.
    pub converged: bool,
}

impl RefinementOutcome {
    /// The last draft produced, if any.
    pub fn final_draft(&self) -> Option<&str> {
        self.steps.last().map(|s| s.draft.as_str())
    }

    pub fn final_score(&self) -> f64 {
        self.steps.last().map_or(0.0, |s| s.critique.score)
    }
}

#[derive(Debug, Clone)]
pub struct SelfRefinementLoop {
    gate: OracleGate,
    config: RefinementConfig,
}

impl SelfRefinementLoop {
    pub fn new(gate: OracleGate, config: RefinementConfig) -> Self {
        Self { gate, config }
    }

    /// Draft, then critique and revise until the target score or the
    /// iteration limit is reached.
    pub async fn run(&self, task: &str) -> RefinementOutcome {
        let mut outcome = RefinementOutcome::default();
        let prompt = prompts::render(prompts::REFINE_GENERATE, &[("task", task)]);
        let Some(mut draft) = self.gate.ask("refine generate", &prompt).await else {
            return outcome;
        };

        let max_iterations = self.config.max_iterations.max(1);
        for iteration in 1..=max_iterations {
            let critique = self.critique(task, &draft).await;
            let done = !critique.answered || critique.score >= self.config.target_score;
            outcome.converged = critique.answered && critique.score >= self.config.target_score;

            tracing::debug!(iteration, score = critique.score, "refinement critique");
            let points = critique.points.clone();
            outcome.steps.push(RefinementStep {
                iteration,
                draft: draft.clone(),
                critique,
            });
            if done || iteration == max_iterations {
                break;
            }

            let critique_text = points
                .iter()
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = prompts::render(
                prompts::REFINE_REVISE,
                &[("task", task), ("draft", draft.as_str()), ("critique", critique_text.as_str())],
            );
            match self.gate.ask("refine revise", &prompt).await {
                Some(revised) => draft = revised,
                None => break,
            }
        }

        outcome
    }

    /// Critique `draft` against `task`.
    pub async fn critique(&self, task: &str, draft: &str) -> Critique {
        let prompt = prompts::render(prompts::REFINE_CRITIQUE, &[("task", task), ("draft", draft)]);
        match self.gate.ask("refine critique", &prompt).await {
            Some(answer) => Critique::parse(&answer),
            None => Critique::unanswered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedOracle;
    use std::sync::Arc;
    use std::time::Duration;

    fn refinement(oracle: Arc<ScriptedOracle>, max_iterations: usize) -> SelfRefinementLoop {
        SelfRefinementLoop::new(
            OracleGate::new(oracle, 1, Duration::from_secs(5)),
            RefinementConfig {
                max_iterations,
                target_score: 0.8,
            },
        )
    }

    #[tokio::test]
    async fn test_converges_when_target_reached() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .respond_to(prompts::task::REFINE_GENERATE, "draft one")
                .respond_when([prompts::task::REFINE_CRITIQUE, "draft one"], "SCORE: 0.4\nCRITIQUE:\n- too short")
                .respond_when([prompts::task::REFINE_CRITIQUE, "draft two"], "SCORE: 9/10\nCRITIQUE:\nNone")
                .respond_to(prompts::task::REFINE_REVISE, "draft two"),
        );
        let outcome = refinement(oracle.clone(), 3).run("a haiku about rain").await;

        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.converged);
        assert_eq!(outcome.final_draft(), Some("draft two"));
        assert_eq!(outcome.final_score(), 0.9);
        // The revise prompt carried the critique points.
        let revise = oracle
            .prompts()
            .into_iter()
            .find(|p| p.contains(prompts::task::REFINE_REVISE))
            .unwrap();
        assert!(revise.contains("- too short"));
    }

    #[tokio::test]
    async fn test_stops_at_iteration_limit() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .respond_to(prompts::task::REFINE_CRITIQUE, "SCORE: 0.3")
                .with_default("another draft"),
        );
        let outcome = refinement(oracle.clone(), 2).run("task").await;
        assert_eq!(outcome.steps.len(), 2);
        assert!(!outcome.converged);
        assert_eq!(oracle.count_containing(prompts::task::REFINE_REVISE), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_gives_empty_outcome() {
        let oracle = Arc::new(ScriptedOracle::new().fail_on(prompts::task::REFINE_GENERATE));
        let outcome = refinement(oracle, 3).run("task").await;
        assert!(outcome.steps.is_empty());
        assert_eq!(outcome.final_draft(), None);
        assert_eq!(outcome.final_score(), 0.0);
    }

    #[tokio::test]
    async fn test_critique_alone() {
        let oracle = Arc::new(
            ScriptedOracle::new().respond_to(prompts::task::REFINE_CRITIQUE, "SCORE: 70%\nCRITIQUE:\n- pacing"),
        );
        let critique = refinement(oracle, 1).critique("pitch", "script").await;
        assert!(critique.answered);
        assert!((critique.score - 0.7).abs() < 1e-9);
        assert_eq!(critique.points, vec!["pacing"]);
    }
}
