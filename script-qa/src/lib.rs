//! Quality assurance for annotated narrative scripts.
//!
//! This crate provides:
//! - Notation grammar checks for scene markers, camera blocks, tags and frame chunks
//! - A tag usage graph with orphan, phantom and ownership checks
//! - Cross-scene continuity tracking with proposed (never applied) repairs
//! - Whole-script and per-scene review with a deterministic reconciliation
//! - A five-lens review panel per scene
//! - An optional generate, critique, refine loop
//!
//! The engine only advises: it never modifies the script it is given.
//!
//! # Quick Start
//!
//! ```ignore
//! use oracle::ClaudeOracle;
//! use script_qa::{Orchestrator, QaConfig, RawEntity, RawWorldConfig, Scene};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let oracle = Arc::new(ClaudeOracle::from_env()?);
//!     let orchestrator = Orchestrator::new(oracle, QaConfig::default());
//!
//!     let world = RawWorldConfig::new()
//!         .with_character(RawEntity::new("CHAR_MEI", "Mei"))
//!         .with_location(RawEntity::new("LOC_PIER", "Pier 9"));
//!     let script = "## Scene 1: Arrival\n[1.1.cA] (Wide)\n[CHAR_MEI] waits on [LOC_PIER].";
//!     let scenes = vec![Scene::new(1, script)];
//!
//!     let report = orchestrator
//!         .run_quality_assurance(script, scenes, &world, "A courier's last delivery")
//!         .await?;
//!     println!("{}", report.render_summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod continuity;
pub mod dual_scope;
pub mod error;
pub mod gate;
pub mod lens_panel;
pub mod notation;
pub mod orchestrator;
pub mod prompts;
pub mod refinement;
pub mod report;
pub mod response;
pub mod tag_graph;
pub mod tags;
pub mod testing;
pub mod world;

// Primary public API
pub use config::{Phase, PhaseThresholds, QaConfig, RefinementConfig};
pub use context::{SceneSlice, SharedContext};
pub use continuity::{validate_thread, ContinuityEngine, ContinuityReport, ContinuityThread};
pub use dual_scope::{reconcile, DualScopeAnalyzer, TelescopeAnalysis};
pub use error::{PhaseError, QaError, QaResult, TagError};
pub use gate::OracleGate;
pub use lens_panel::{InquisitorReport, MultiLensPanel};
pub use notation::{NotationCategory, NotationReport, NotationValidator};
pub use orchestrator::Orchestrator;
pub use refinement::SelfRefinementLoop;
pub use report::{Priority, QualityPhaseResult, QualityReport};
pub use tag_graph::{ConstellationMap, TagGraphValidator};
pub use tags::{Tag, TagVocabulary, DEFAULT_PREFIXES};
pub use testing::ScriptedOracle;
pub use world::{RawEntity, RawWorldConfig, Scene, WorldConfig};

// The oracle seam, re-exported so callers need only one import.
pub use oracle::{Oracle, OracleError};
