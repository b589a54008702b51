//! Evaluation result shapes.
//!
//! All of these are transient: produced from a (transcript, note) pair,
//! consumed once by the caller, never persisted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const Q_NOTE_MAX: u32 = 35;
pub const PDQI_MAX: u32 = 40;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{rubric}.{dimension} score {value} outside 1..=5")]
    ScoreOutOfRange {
        rubric: &'static str,
        dimension: &'static str,
        value: u8,
    },
}

/// A four-section clinical note as submitted by the student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

impl SoapNote {
    /// The labeled-section rendering both evaluation passes receive.
    pub fn as_sections_text(&self) -> String {
        format!(
            "S:\n{}\nO:\n{}\nA:\n{}\nP:\n{}",
            self.subjective, self.objective, self.assessment, self.plan
        )
    }

    pub fn is_empty(&self) -> bool {
        self.subjective.trim().is_empty()
            && self.objective.trim().is_empty()
            && self.assessment.trim().is_empty()
            && self.plan.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteSection {
    S,
    O,
    A,
    P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportLevel {
    Supported,
    Partial,
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedClaim {
    pub section: NoteSection,
    pub claim_text: String,
    pub support: SupportLevel,
    /// Verbatim transcript quotes; mandatory for anything judged supported.
    #[serde(default)]
    pub evidence_quotes: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCategory {
    History,
    Symptom,
    RedFlag,
    Medication,
    Allergy,
    Social,
    Preference,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Critical,
    Important,
    NiceToHave,
}

/// Present in the transcript but absent from the note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingItem {
    pub category: MissingCategory,
    pub importance: Importance,
    pub item: String,
    #[serde(default)]
    pub evidence_quotes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// In the note with no transcript support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HallucinationRisk {
    pub section: NoteSection,
    pub item: String,
    pub severity: Severity,
    pub why: String,
}

/// Output of the fact-check pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub version: String,
    #[serde(default)]
    pub supported_claims: Vec<SupportedClaim>,
    #[serde(default)]
    pub missing_from_soap: Vec<MissingItem>,
    #[serde(default)]
    pub hallucination_risk: Vec<HallucinationRisk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreItem {
    pub score_1to5: u8,
    pub rationale: String,
    pub one_line_fix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QNoteScores {
    pub clear: ScoreItem,
    pub complete: ScoreItem,
    pub concise: ScoreItem,
    pub current: ScoreItem,
    pub organized: ScoreItem,
    pub prioritized: ScoreItem,
    pub sufficient: ScoreItem,
}

impl QNoteScores {
    pub fn items(&self) -> [(&'static str, &ScoreItem); 7] {
        [
            ("Clear", &self.clear),
            ("Complete", &self.complete),
            ("Concise", &self.concise),
            ("Current", &self.current),
            ("Organized", &self.organized),
            ("Prioritized", &self.prioritized),
            ("Sufficient", &self.sufficient),
        ]
    }

    pub fn total(&self) -> u32 {
        self.items().iter().map(|(_, s)| s.score_1to5 as u32).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pdqi8Scores {
    pub accurate: ScoreItem,
    pub thorough: ScoreItem,
    pub useful: ScoreItem,
    pub organized: ScoreItem,
    pub comprehensible: ScoreItem,
    pub succinct: ScoreItem,
    pub synthesized: ScoreItem,
    pub internally_consistent: ScoreItem,
}

impl Pdqi8Scores {
    pub fn items(&self) -> [(&'static str, &ScoreItem); 8] {
        [
            ("Accurate", &self.accurate),
            ("Thorough", &self.thorough),
            ("Useful", &self.useful),
            ("Organized", &self.organized),
            ("Comprehensible", &self.comprehensible),
            ("Succinct", &self.succinct),
            ("Synthesized", &self.synthesized),
            ("InternallyConsistent", &self.internally_consistent),
        ]
    }

    pub fn total(&self) -> u32 {
        self.items().iter().map(|(_, s)| s.score_1to5 as u32).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricScores {
    pub q_note: QNoteScores,
    pub pdqi_8: Pdqi8Scores,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalTotals {
    pub q_note_total: u32,
    pub pdqi_total: u32,
    pub overall_comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityFix {
    pub rank: u8,
    pub issue: String,
    pub why: String,
    #[serde(rename = "where")]
    pub location: NoteSection,
    pub example_patch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalFlags {
    pub red_flags_missing: bool,
    pub hallucination_high: bool,
}

/// Raw output of the scoring pass, before the fact-check result is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub version: String,
    pub scores: RubricScores,
    pub totals: EvalTotals,
    #[serde(default)]
    pub priority_fixes_top3: Vec<PriorityFix>,
    pub flags: EvalFlags,
}

impl ScoringOutcome {
    /// Every dimension score must be an integer in 1..=5; anything else is a
    /// malformed model reply and fails the evaluation.
    pub fn validate(&self) -> Result<(), EvaluationError> {
        for (dimension, item) in self.scores.q_note.items() {
            if !(1..=5).contains(&item.score_1to5) {
                return Err(EvaluationError::ScoreOutOfRange {
                    rubric: "q_note",
                    dimension,
                    value: item.score_1to5,
                });
            }
        }
        for (dimension, item) in self.scores.pdqi_8.items() {
            if !(1..=5).contains(&item.score_1to5) {
                return Err(EvaluationError::ScoreOutOfRange {
                    rubric: "pdqi_8",
                    dimension,
                    value: item.score_1to5,
                });
            }
        }
        Ok(())
    }

    /// Totals are recomputed from the dimensions; the model's own arithmetic
    /// is not trusted.
    pub fn recompute_totals(&mut self) {
        self.totals.q_note_total = self.scores.q_note.total();
        self.totals.pdqi_total = self.scores.pdqi_8.total();
    }
}

/// Final evaluation result: the scoring outcome with the fact-check result
/// attached verbatim for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapEvaluationResult {
    pub version: String,
    pub scores: RubricScores,
    pub totals: EvalTotals,
    #[serde(default)]
    pub priority_fixes_top3: Vec<PriorityFix>,
    pub flags: EvalFlags,
    pub fact_check: FactCheckResult,
}

impl SoapEvaluationResult {
    pub fn from_parts(scoring: ScoringOutcome, fact_check: FactCheckResult) -> Self {
        Self {
            version: scoring.version,
            scores: scoring.scores,
            totals: scoring.totals,
            priority_fixes_top3: scoring.priority_fixes_top3,
            flags: scoring.flags,
            fact_check,
        }
    }
}

// --- mini-CEX (finish-session) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachDimension {
    pub key: String,
    pub label: String,
    pub score: u8,
    pub max: u8,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachFeedback {
    pub good_points: String,
    pub improvements: String,
    pub next_steps: String,
    pub patient_voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RationaleLink {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachEvaluation {
    pub total_score: u32,
    pub dimensions: Vec<CoachDimension>,
    pub detailed_feedback: CoachFeedback,
    #[serde(default)]
    pub rationale_links: Vec<RationaleLink>,
}

impl CoachEvaluation {
    /// Recompute the total from the dimension scores.
    pub fn normalized(mut self) -> Self {
        self.total_score = self.dimensions.iter().map(|d| d.score as u32).sum();
        self
    }

    /// Canned result returned when the coaching call fails, so the session
    /// still ends with something renderable.
    pub fn fallback() -> Self {
        let dim = |key: &str, label: &str, score: u8, comment: &str| CoachDimension {
            key: key.to_string(),
            label: label.to_string(),
            score,
            max: 6,
            comment: comment.to_string(),
        };
        Self {
            total_score: 18,
            dimensions: vec![
                dim("interview", "病歴（病状の把握）", 3, "評価を生成できませんでした。"),
                dim("exam", "身体診察", 3, "評価を生成できませんでした。"),
                dim("communication", "コミュニケーション能力", 3, "評価を生成できませんでした。"),
                dim("judgment", "臨床判断", 3, "評価を生成できませんでした。"),
                dim("professionalism", "プロフェッショナリズム", 3, "評価を生成できませんでした。"),
                dim("management", "マネジメント", 3, "評価を生成できませんでした。"),
            ],
            detailed_feedback: CoachFeedback {
                good_points: "評価サービスに接続できなかったため、自動評価は保留されました。"
                    .to_string(),
                improvements: "時間をおいて再度評価を実行してください。".to_string(),
                next_steps: "面接ログは保持されています。再評価をお試しください。".to_string(),
                patient_voice: "（今回は感想を生成できませんでした）".to_string(),
            },
            rationale_links: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(n: u8) -> ScoreItem {
        ScoreItem {
            score_1to5: n,
            rationale: "r".to_string(),
            one_line_fix: "f".to_string(),
        }
    }

    fn outcome(q: u8, p: u8) -> ScoringOutcome {
        ScoringOutcome {
            version: "soap_eval_v1".to_string(),
            scores: RubricScores {
                q_note: QNoteScores {
                    clear: score(q),
                    complete: score(q),
                    concise: score(q),
                    current: score(q),
                    organized: score(q),
                    prioritized: score(q),
                    sufficient: score(q),
                },
                pdqi_8: Pdqi8Scores {
                    accurate: score(p),
                    thorough: score(p),
                    useful: score(p),
                    organized: score(p),
                    comprehensible: score(p),
                    succinct: score(p),
                    synthesized: score(p),
                    internally_consistent: score(p),
                },
            },
            totals: EvalTotals {
                q_note_total: 0,
                pdqi_total: 0,
                overall_comment: "ok".to_string(),
            },
            priority_fixes_top3: Vec::new(),
            flags: EvalFlags {
                red_flags_missing: false,
                hallucination_high: false,
            },
        }
    }

    #[test]
    fn totals_are_recomputed_from_dimensions() {
        let mut o = outcome(5, 5);
        o.recompute_totals();
        assert_eq!(o.totals.q_note_total, Q_NOTE_MAX);
        assert_eq!(o.totals.pdqi_total, PDQI_MAX);

        let mut mixed = outcome(3, 2);
        mixed.recompute_totals();
        assert_eq!(mixed.totals.q_note_total, 21);
        assert_eq!(mixed.totals.pdqi_total, 16);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        assert!(outcome(1, 1).validate().is_ok());
        assert!(outcome(5, 5).validate().is_ok());
        assert!(outcome(0, 3).validate().is_err());
        assert!(outcome(3, 6).validate().is_err());
    }

    #[test]
    fn rubric_keys_serialize_with_original_names() {
        let o = outcome(4, 4);
        let json = serde_json::to_value(&o).unwrap();
        assert!(json["scores"]["q_note"]["Clear"]["score_1to5"].is_u64());
        assert!(json["scores"]["pdqi_8"]["InternallyConsistent"].is_object());
    }

    #[test]
    fn priority_fix_where_key_roundtrips() {
        let fix = PriorityFix {
            rank: 1,
            issue: "i".to_string(),
            why: "w".to_string(),
            location: NoteSection::O,
            example_patch: "p".to_string(),
        };
        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["where"], "O");
        let back: PriorityFix = serde_json::from_value(json).unwrap();
        assert_eq!(back.location, NoteSection::O);
    }

    #[test]
    fn fact_check_parses_with_missing_lists() {
        let parsed: FactCheckResult =
            serde_json::from_str(r#"{"version":"factcheck_v1"}"#).unwrap();
        assert!(parsed.supported_claims.is_empty());
        assert!(parsed.missing_from_soap.is_empty());
        assert!(parsed.hallucination_risk.is_empty());
    }

    #[test]
    fn soap_note_sections_render_in_order() {
        let note = SoapNote {
            subjective: "s".to_string(),
            objective: "o".to_string(),
            assessment: "a".to_string(),
            plan: "p".to_string(),
        };
        assert_eq!(note.as_sections_text(), "S:\ns\nO:\no\nA:\na\nP:\np");
        assert!(!note.is_empty());
    }

    #[test]
    fn coach_evaluation_normalizes_total() {
        let eval = CoachEvaluation::fallback().normalized();
        assert_eq!(eval.total_score, 18);
    }
}
