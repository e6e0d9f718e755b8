//! QA runs against the live Claude oracle.
//!
//! These tests check that real answers survive the tolerant parsers:
//! - A full default run produces a report for every phase without errors
//! - The refinement loop drafts and critiques
//!
//! Run with: `ANTHROPIC_API_KEY=$ANTHROPIC_API_KEY cargo test -p script-qa --test live_oracle -- --ignored --nocapture`

use oracle::ClaudeOracle;
use script_qa::gate::OracleGate;
use script_qa::testing::{sample_scenes, sample_script, sample_world};
use script_qa::{Orchestrator, Phase, QaConfig, RefinementConfig, SelfRefinementLoop};
use std::sync::Arc;
use std::time::Duration;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_full_run_against_claude() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let oracle = Arc::new(ClaudeOracle::from_env().expect("API key present"));
    let config = QaConfig::default()
        .enable(Phase::Mirror)
        .with_max_concurrent_oracle_calls(2)
        .with_oracle_timeout(Duration::from_secs(120));
    let orchestrator = Orchestrator::new(oracle, config);

    let script = sample_script();
    let report = orchestrator
        .run_quality_assurance(&script, sample_scenes(), &sample_world(), "A courier's last night on the docks")
        .await
        .expect("valid inputs");

    println!("{}", report.render_summary());
    assert_eq!(report.phases.len(), 6);
    for phase in &report.phases {
        assert!(phase.error.is_none(), "{} failed: {:?}", phase.phase, phase.error);
        assert!((0.0..=1.0).contains(&phase.score));
    }
    // The sample script is notation-clean.
    assert_eq!(report.phase(Phase::Anchor).unwrap().issues_found, 0);
    assert_eq!(report.final_script, script);
}

#[tokio::test]
#[ignore]
async fn test_refinement_loop_against_claude() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let oracle = Arc::new(ClaudeOracle::from_env().expect("API key present").with_max_tokens(1024));
    let refinement = SelfRefinementLoop::new(
        OracleGate::new(oracle, 1, Duration::from_secs(120)),
        RefinementConfig {
            max_iterations: 2,
            target_score: 0.8,
        },
    );

    let outcome = refinement
        .run("Write a four-line scene of a courier handing over a storm lantern.")
        .await;
    for step in &outcome.steps {
        println!("--- iteration {} (score {:.2})\n{}", step.iteration, step.critique.score, step.draft);
    }
    assert!(!outcome.steps.is_empty());
    assert!(outcome.steps.len() <= 2);
    assert!(outcome.final_draft().is_some_and(|d| !d.trim().is_empty()));
}
