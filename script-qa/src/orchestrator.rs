//! Sequences the phases of a QA run and aggregates their results.
//!
//! Phases run one after another so that oracle load stays bounded; work
//! inside a phase fans out across scenes. Each phase runs in its own task,
//! so a timeout or a panic costs that phase only.

use crate::config::{Phase, QaConfig};
use crate::context::SharedContext;
use crate::continuity::ContinuityEngine;
use crate::dual_scope::DualScopeAnalyzer;
use crate::error::{PhaseError, QaResult};
use crate::gate::OracleGate;
use crate::lens_panel::{panel_score, MultiLensPanel};
use crate::notation::NotationValidator;
use crate::refinement::SelfRefinementLoop;
use crate::report::{QualityPhaseResult, QualityReport};
use crate::tag_graph::TagGraphValidator;
use crate::world::{RawWorldConfig, Scene};
use oracle::Oracle;
use serde_json::Value;
use std::sync::Arc;

/// What a phase hands back before thresholds are applied.
#[derive(Debug)]
struct PhaseOutcome {
    score: f64,
    issues_found: usize,
    details: Value,
}

/// Runs QA passes over scripts.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    gate: OracleGate,
    config: QaConfig,
}

impl Orchestrator {
    /// Create an orchestrator. The oracle is shared by every phase through
    /// one concurrency limit.
    pub fn new(oracle: Arc<dyn Oracle>, config: QaConfig) -> Self {
        let gate = OracleGate::new(
            oracle,
            config.max_concurrent_oracle_calls,
            config.oracle_timeout(),
        );
        Self { gate, config }
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    /// Validate the inputs, then run every enabled phase.
    ///
    /// Usage errors are returned before any phase starts. Phase failures
    /// are recorded in the report instead.
    pub async fn run_quality_assurance(
        &self,
        script: &str,
        scenes: Vec<Scene>,
        world: &RawWorldConfig,
        pitch: &str,
    ) -> QaResult<QualityReport> {
        let context = SharedContext::new(pitch, script, scenes, world, self.config.tag_prefixes.clone())?;
        Ok(self.run_with_context(Arc::new(context)).await)
    }

    /// Run every enabled phase against an already validated context.
    pub async fn run_with_context(&self, context: Arc<SharedContext>) -> QualityReport {
        let plan = self.config.phase_plan();
        tracing::info!(
            phases = plan.len(),
            scenes = context.scenes().len(),
            "starting QA run"
        );

        let mut results = Vec::with_capacity(plan.len());
        for phase in plan {
            let result = self.run_phase(phase, Arc::clone(&context)).await;
            match &result.error {
                Some(error) => tracing::warn!(%phase, %error, "phase failed"),
                None => tracing::info!(
                    %phase,
                    score = result.score,
                    passed = result.passed,
                    issues = result.issues_found,
                    "phase complete"
                ),
            }
            results.push(result);
        }

        let report = QualityReport::new(context.script(), results, self.config.min_overall_score);
        tracing::info!(
            run_id = %report.run_id,
            overall = report.overall_score,
            passed = report.passed,
            "QA run finished"
        );
        report
    }

    async fn run_phase(&self, phase: Phase, context: Arc<SharedContext>) -> QualityPhaseResult {
        let threshold = self.config.thresholds.get(phase);
        let runner = self.clone();
        let mut handle = tokio::spawn(async move { runner.execute(phase, &context).await });

        let joined = match self.config.phase_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return QualityPhaseResult::failed(phase, PhaseError::Timeout(limit).to_string());
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(outcome)) => QualityPhaseResult::completed(
                phase,
                outcome.score,
                threshold,
                outcome.issues_found,
                outcome.details,
            ),
            Ok(Err(err)) => QualityPhaseResult::failed(phase, err.to_string()),
            Err(err) => QualityPhaseResult::failed(phase, PhaseError::TaskFailed(err.to_string()).to_string()),
        }
    }

    async fn execute(&self, phase: Phase, context: &SharedContext) -> Result<PhaseOutcome, PhaseError> {
        tracing::debug!(%phase, "phase starting");
        match phase {
            Phase::Telescope => {
                let analysis = DualScopeAnalyzer::new(self.gate.clone())
                    .analyze_script(context)
                    .await?;
                Ok(PhaseOutcome {
                    score: analysis.reconciliation.overall_quality,
                    issues_found: analysis.reconciliation.issues.len(),
                    details: serde_json::to_value(&analysis)?,
                })
            }
            Phase::Inquisitor => {
                let reports = MultiLensPanel::new(self.gate.clone())
                    .interrogate_all(context)
                    .await?;
                Ok(PhaseOutcome {
                    score: panel_score(&reports),
                    issues_found: reports.iter().map(|r| r.directives.len()).sum(),
                    details: serde_json::to_value(&reports)?,
                })
            }
            Phase::Continuity => {
                let report = ContinuityEngine::new(self.gate.clone())
                    .weave_threads(context)
                    .await?;
                Ok(PhaseOutcome {
                    score: report.continuity_score,
                    issues_found: report.issues.len(),
                    details: serde_json::to_value(&report)?,
                })
            }
            Phase::Constellation => {
                let map = TagGraphValidator::new(self.gate.clone())
                    .map_constellation(context)
                    .await;
                Ok(PhaseOutcome {
                    score: map.score(),
                    issues_found: map.issues.len(),
                    details: serde_json::to_value(&map)?,
                })
            }
            Phase::Anchor => {
                let report = NotationValidator::new(context.vocabulary().clone())
                    .validate(context.script(), context.declared_tags());
                Ok(PhaseOutcome {
                    score: report.score(),
                    issues_found: report.issues.len(),
                    details: serde_json::to_value(&report)?,
                })
            }
            Phase::Mirror => {
                let task = format!(
                    "Write a complete, well-structured narrative script for this pitch:\n{}",
                    context.pitch()
                );
                let critique = SelfRefinementLoop::new(self.gate.clone(), self.config.refinement.clone())
                    .critique(&task, context.script())
                    .await;
                Ok(PhaseOutcome {
                    score: critique.score,
                    issues_found: critique.points.len(),
                    details: serde_json::to_value(&critique)?,
                })
            }
        }
    }
}
