//! Multi-lens review panel ("Inquisitor" phase).
//!
//! Five reviewers look at the same scene, each through its own lens and
//! with its own fixed questions. Every question is one oracle call and all
//! of them run at once. When every answer is in, one more call folds the
//! findings into a 1-5 score and a list of prioritized directives.

use crate::context::{SceneSlice, SharedContext};
use crate::error::PhaseError;
use crate::gate::{fan_out, OracleGate};
use crate::prompts;
use crate::report::Priority;
use crate::response::{parse_number, LabeledBlocks};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const MIN_SCORE: f64 = 1.0;
const MAX_SCORE: f64 = 5.0;
/// Confidence assumed when an answer omits it.
const MISSING_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lens {
    Visual,
    Narrative,
    Character,
    World,
    Technical,
}

impl Lens {
    pub const ALL: [Lens; 5] = [
        Lens::Visual,
        Lens::Narrative,
        Lens::Character,
        Lens::World,
        Lens::Technical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Lens::Visual => "visual",
            Lens::Narrative => "narrative",
            Lens::Character => "character",
            Lens::World => "world",
            Lens::Technical => "technical",
        }
    }

    /// The questions this lens always asks.
    pub fn questions(&self) -> &'static [&'static str] {
        match self {
            Lens::Visual => &[
                "Can every moment in this scene be framed as a single clear shot?",
                "Do the camera blocks change where the visual action changes?",
                "Is the setting described well enough to stage and light?",
            ],
            Lens::Narrative => &[
                "Does the scene advance its stated purpose?",
                "Does the scene have a clear turn before it ends?",
                "Does the scene follow on from the one before it?",
            ],
            Lens::Character => &[
                "Do the characters act consistently with their established traits?",
                "Are the characters' positions and movements physically possible?",
                "Are the characters' motivations readable from their actions?",
            ],
            Lens::World => &[
                "Are locations and props used the way the world describes them?",
                "Does every tagged entity exist in the world list?",
                "Does the scene respect the established rules of the world?",
            ],
            Lens::Technical => &[
                "Is the scene, frame and camera notation correct?",
                "Are all tags written in canonical uppercase form?",
                "Are frame chunks opened and closed properly?",
            ],
        }
    }
}

impl fmt::Display for Lens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One reviewer's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub lens: Lens,
    pub question: String,
    pub answer: String,
    /// 0 when the call failed.
    pub confidence: f64,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub raw: Option<String>,
}

impl QuestionAnswer {
    fn unanswered(lens: Lens, question: &str) -> Self {
        Self {
            lens,
            question: question.to_string(),
            answer: String::new(),
            confidence: 0.0,
            issues: Vec::new(),
            suggestions: Vec::new(),
            raw: None,
        }
    }

    fn parse(lens: Lens, question: &str, answer: &str) -> Self {
        let blocks = LabeledBlocks::parse(answer);
        Self {
            lens,
            question: question.to_string(),
            answer: blocks.scalar("ANSWER").unwrap_or_default().to_string(),
            confidence: blocks.unit_score("CONFIDENCE").unwrap_or(MISSING_CONFIDENCE),
            issues: blocks.list("ISSUES"),
            suggestions: blocks.list("SUGGESTIONS"),
            raw: Some(answer.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub priority: Priority,
    pub text: String,
}

impl Directive {
    /// Read `[HIGH] text`. Unmarked directives are medium priority.
    pub fn parse(item: &str) -> Self {
        let item = item.trim();
        if let Some(rest) = item.strip_prefix('[') {
            if let Some((marker, text)) = rest.split_once(']') {
                if let Some(priority) = Priority::parse(marker) {
                    return Self {
                        priority,
                        text: text.trim().to_string(),
                    };
                }
            }
        }
        Self {
            priority: Priority::Medium,
            text: item.to_string(),
        }
    }
}

/// The panel's combined verdict on a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// In [1, 5].
    pub overall_score: f64,
    pub critical_issues: Vec<String>,
    pub directives: Vec<Directive>,
    pub strengths: Vec<String>,
    /// Whether the score was estimated locally instead of by the oracle.
    pub heuristic: bool,
    pub raw: Option<String>,
}

impl Synthesis {
    /// Score from mean confidence; every collected issue becomes a medium directive.
    pub fn heuristic(answers: &[QuestionAnswer]) -> Self {
        let mean_confidence = if answers.is_empty() {
            0.0
        } else {
            answers.iter().map(|a| a.confidence).sum::<f64>() / answers.len() as f64
        };
        let directives = answers
            .iter()
            .flat_map(|a| a.issues.iter())
            .map(|issue| Directive {
                priority: Priority::Medium,
                text: issue.clone(),
            })
            .collect();
        Self {
            overall_score: (MIN_SCORE + 4.0 * mean_confidence).clamp(MIN_SCORE, MAX_SCORE),
            critical_issues: Vec::new(),
            directives,
            strengths: Vec::new(),
            heuristic: true,
            raw: None,
        }
    }

    /// Read the synthesis template, filling gaps from the heuristic.
    fn parse(answer: &str, answers: &[QuestionAnswer]) -> Self {
        let blocks = LabeledBlocks::parse(answer);
        let Some(score) = blocks.scalar("OVERALL_SCORE").and_then(parse_number) else {
            tracing::warn!("synthesis has no overall score; estimating");
            let mut fallback = Self::heuristic(answers);
            fallback.raw = Some(answer.to_string());
            return fallback;
        };
        Self {
            overall_score: score.clamp(MIN_SCORE, MAX_SCORE),
            critical_issues: blocks.list("CRITICAL_ISSUES"),
            directives: blocks.list("DIRECTIVES").iter().map(|d| Directive::parse(d)).collect(),
            strengths: blocks.list("STRENGTHS"),
            heuristic: false,
            raw: Some(answer.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InquisitorReport {
    pub scene_number: u32,
    pub questions: Vec<QuestionAnswer>,
    pub synthesis: Synthesis,
    /// In [1, 5].
    pub score: f64,
    pub critical_issues: Vec<String>,
    pub directives: Vec<Directive>,
}

impl InquisitorReport {
    /// The score mapped onto [0, 1].
    pub fn normalized_score(&self) -> f64 {
        ((self.score - MIN_SCORE) / (MAX_SCORE - MIN_SCORE)).clamp(0.0, 1.0)
    }
}

/// Mean normalized score across scenes; zero when there are none.
pub fn panel_score(reports: &[InquisitorReport]) -> f64 {
    if reports.is_empty() {
        return 0.0;
    }
    reports.iter().map(InquisitorReport::normalized_score).sum::<f64>() / reports.len() as f64
}

/// Prompts for one scene, built up front so the work can leave the context.
struct PreparedScene {
    scene_number: u32,
    questions: Vec<(Lens, &'static str, String)>,
}

fn prepare(scene: SceneSlice<'_>) -> PreparedScene {
    let world = scene.context.derived().world_summary.as_str();
    let brief = scene.brief();
    let questions = Lens::ALL
        .iter()
        .flat_map(|lens| lens.questions().iter().map(move |q| (*lens, *q)))
        .map(|(lens, question)| {
            let prompt = prompts::render(
                prompts::LENS_QUESTION,
                &[
                    ("lens", lens.name()),
                    ("world", world),
                    ("scene", brief.as_str()),
                    ("question", question),
                ],
            );
            (lens, question, prompt)
        })
        .collect();
    PreparedScene {
        scene_number: scene.scene.scene_number,
        questions,
    }
}

async fn run_prepared(gate: OracleGate, prepared: PreparedScene) -> Result<InquisitorReport, PhaseError> {
    let scene_number = prepared.scene_number;
    let question_gate = gate.clone();
    let answers = fan_out(prepared.questions, move |(lens, question, prompt)| {
        let gate = question_gate.clone();
        async move {
            match gate.ask("lens question", &prompt).await {
                Some(answer) => QuestionAnswer::parse(lens, question, &answer),
                None => QuestionAnswer::unanswered(lens, question),
            }
        }
    })
    .await?;

    // All lenses have answered; synthesis sees the complete picture.
    let prompt = synthesis_prompt(scene_number, &answers);
    let synthesis = match gate.ask("lens synthesis", &prompt).await {
        Some(answer) => Synthesis::parse(&answer, &answers),
        None => Synthesis::heuristic(&answers),
    };

    tracing::debug!(
        scene = scene_number,
        score = synthesis.overall_score,
        heuristic = synthesis.heuristic,
        directives = synthesis.directives.len(),
        "scene interrogated"
    );

    Ok(InquisitorReport {
        scene_number,
        score: synthesis.overall_score,
        critical_issues: synthesis.critical_issues.clone(),
        directives: synthesis.directives.clone(),
        questions: answers,
        synthesis,
    })
}

fn synthesis_prompt(scene_number: u32, answers: &[QuestionAnswer]) -> String {
    let mut issues_by_lens: BTreeMap<Lens, Vec<&str>> = BTreeMap::new();
    let mut confidence_by_lens: BTreeMap<Lens, (f64, usize)> = BTreeMap::new();
    for answer in answers {
        issues_by_lens
            .entry(answer.lens)
            .or_default()
            .extend(answer.issues.iter().map(String::as_str));
        let slot = confidence_by_lens.entry(answer.lens).or_insert((0.0, 0));
        slot.0 += answer.confidence;
        slot.1 += 1;
    }

    let mut issues = String::new();
    for (lens, list) in &issues_by_lens {
        issues.push_str(&format!("### {lens}\n"));
        if list.is_empty() {
            issues.push_str("- None\n");
        }
        for issue in list {
            issues.push_str(&format!("- {issue}\n"));
        }
    }
    let confidence = confidence_by_lens
        .iter()
        .map(|(lens, (sum, n))| format!("{lens}: {:.2}", sum / (*n).max(1) as f64))
        .collect::<Vec<_>>()
        .join("\n");

    prompts::render(
        prompts::LENS_SYNTHESIS,
        &[
            ("scene_number", scene_number.to_string().as_str()),
            ("issues", issues.trim_end()),
            ("confidence", confidence.as_str()),
        ],
    )
}

/// Runs the five-lens panel.
#[derive(Debug, Clone)]
pub struct MultiLensPanel {
    gate: OracleGate,
}

impl MultiLensPanel {
    pub fn new(gate: OracleGate) -> Self {
        Self { gate }
    }

    /// Interrogate one scene.
    pub async fn interrogate_scene(&self, scene: SceneSlice<'_>) -> Result<InquisitorReport, PhaseError> {
        run_prepared(self.gate.clone(), prepare(scene)).await
    }

    /// Interrogate every scene concurrently. Reports come back in scene order.
    pub async fn interrogate_all(&self, context: &SharedContext) -> Result<Vec<InquisitorReport>, PhaseError> {
        let prepared: Vec<PreparedScene> = context.scene_slices().map(prepare).collect();
        let gate = self.gate.clone();
        let reports = fan_out(prepared, move |scene| run_prepared(gate.clone(), scene)).await?;
        reports.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagVocabulary;
    use crate::testing::{sample_scenes, sample_script, sample_world, ScriptedOracle};
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> SharedContext {
        SharedContext::new("pitch", sample_script(), sample_scenes(), &sample_world(), TagVocabulary::default())
            .unwrap()
    }

    fn panel(oracle: Arc<ScriptedOracle>) -> MultiLensPanel {
        MultiLensPanel::new(OracleGate::new(oracle, 4, Duration::from_secs(5)))
    }

    #[test]
    fn test_every_lens_has_questions() {
        for lens in Lens::ALL {
            assert!(!lens.questions().is_empty(), "{lens}");
        }
    }

    #[test]
    fn test_directive_parse() {
        assert_eq!(
            Directive::parse("[HIGH] fix the blocking"),
            Directive {
                priority: Priority::High,
                text: "fix the blocking".to_string()
            }
        );
        assert_eq!(Directive::parse("[low] trim").priority, Priority::Low);
        assert_eq!(Directive::parse("tighten dialogue").priority, Priority::Medium);
        assert_eq!(Directive::parse("[CHAR_MEI] needs a line").text, "[CHAR_MEI] needs a line");
    }

    #[test]
    fn test_heuristic_synthesis() {
        let mut high = QuestionAnswer::unanswered(Lens::Visual, "q");
        high.confidence = 1.0;
        high.issues = vec!["too dark".to_string()];
        let low = QuestionAnswer::unanswered(Lens::World, "q");
        let synthesis = Synthesis::heuristic(&[high, low]);
        assert_eq!(synthesis.overall_score, 3.0);
        assert_eq!(synthesis.directives.len(), 1);
        assert_eq!(synthesis.directives[0].priority, Priority::Medium);
        assert!(synthesis.heuristic);
    }

    #[tokio::test]
    async fn test_interrogate_scene_with_synthesis() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .respond_to(
                    prompts::task::LENS_QUESTION,
                    "ANSWER: yes - fine\nCONFIDENCE: 0.8\nISSUES:\n- rain unclear\nSUGGESTIONS:\nNone",
                )
                .respond_to(
                    prompts::task::LENS_SYNTHESIS,
                    "OVERALL_SCORE: 4\nCRITICAL_ISSUES:\n- rain unclear\nDIRECTIVES:\n- [HIGH] show the rain\n- [LOW] name the ship\nSTRENGTHS:\n- mood",
                ),
        );
        let ctx = context();
        let report = panel(oracle.clone())
            .interrogate_scene(ctx.scene(1).unwrap())
            .await
            .unwrap();

        let total_questions: usize = Lens::ALL.iter().map(|l| l.questions().len()).sum();
        assert_eq!(report.questions.len(), total_questions);
        assert_eq!(oracle.count_containing(prompts::task::LENS_QUESTION), total_questions);
        assert_eq!(oracle.count_containing(prompts::task::LENS_SYNTHESIS), 1);
        assert_eq!(report.score, 4.0);
        assert_eq!(report.normalized_score(), 0.75);
        assert_eq!(report.critical_issues, vec!["rain unclear"]);
        assert_eq!(report.directives[0].priority, Priority::High);
        assert!(!report.synthesis.heuristic);

        // The synthesis prompt carries every lens's findings.
        let synthesis_prompt = oracle
            .prompts()
            .into_iter()
            .find(|p| p.contains(prompts::task::LENS_SYNTHESIS))
            .unwrap();
        for lens in Lens::ALL {
            assert!(synthesis_prompt.contains(&format!("### {lens}")));
        }
    }

    #[tokio::test]
    async fn test_failed_synthesis_uses_heuristic() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .respond_to(prompts::task::LENS_QUESTION, "ANSWER: no\nCONFIDENCE: 0.5\nISSUES:\nNone")
                .fail_on(prompts::task::LENS_SYNTHESIS),
        );
        let ctx = context();
        let report = panel(oracle).interrogate_scene(ctx.scene(2).unwrap()).await.unwrap();
        assert!(report.synthesis.heuristic);
        assert_eq!(report.score, 3.0);
        assert!(report.directives.is_empty());
    }

    #[tokio::test]
    async fn test_interrogate_all_in_scene_order() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .respond_when([prompts::task::LENS_SYNTHESIS, "scene 3"], "OVERALL_SCORE: 5")
                .respond_to(prompts::task::LENS_SYNTHESIS, "OVERALL_SCORE: 1")
                .with_default("CONFIDENCE: 0.9"),
        );
        let reports = panel(oracle).interrogate_all(&context()).await.unwrap();
        let numbers: Vec<u32> = reports.iter().map(|r| r.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(reports[2].score, 5.0);
        assert!((panel_score(&reports) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_panicking_oracle_fails_the_panel() {
        let oracle = Arc::new(ScriptedOracle::new().panic_on(prompts::task::LENS_QUESTION));
        let result = panel(oracle).interrogate_all(&context()).await;
        assert!(matches!(result, Err(PhaseError::TaskFailed(_))));
    }
}
