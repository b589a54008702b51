// Interview simulator tasks: the per-turn handler plus the LLM stages used
// by the evaluation and import pipelines.
pub mod case_gen;
pub mod extract;
pub mod fact_check;
pub mod scoring;
pub mod turn;

pub use case_gen::{assign_unique_id, generate_case};
pub use extract::{CaseDraftStage, PdfOcrStage, extract_pdf_text};
pub use fact_check::FactCheckStage;
pub use scoring::ScoringStage;
pub use turn::{parse_turn_reply, send_turn};

/// Keys under which pipeline stages and sessions exchange context values.
pub mod session_keys {
    pub const CASE_ID: &str = "case_id";
    pub const CASE_TITLE: &str = "case_title";
    pub const TRANSCRIPT: &str = "transcript";
    pub const SOAP_TEXT: &str = "soap_text";
    pub const FACT_CHECK: &str = "fact_check";
    pub const EVALUATION: &str = "evaluation";
    pub const PDF_PATH: &str = "pdf_path";
    pub const EXTRACTED_TEXT: &str = "extracted_text";
    pub const CASE_DRAFT: &str = "case_draft";
}
