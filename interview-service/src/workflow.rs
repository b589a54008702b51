//! Pipeline wiring and the single entry points the HTTP handlers call.

use anyhow::{anyhow, bail};
use sim_flow::{Context, ExecutionStatus, Pipeline, PipelineBuilder};
use std::path::Path;
use std::sync::Arc;

use crate::evaluation::{SoapEvaluationResult, SoapNote};
use crate::llm::LlmConfig;
use crate::models::{Case, Message};
use crate::prompts::{format_transcript, truncate_chars};
use crate::tasks::{CaseDraftStage, FactCheckStage, PdfOcrStage, ScoringStage, session_keys};

/// Two sequential stages, no branching: fact-check, then scoring conditioned
/// on the fact-check output.
pub fn evaluation_pipeline(llm: &LlmConfig) -> Pipeline {
    PipelineBuilder::new("soap_evaluation")
        .add_stage(Arc::new(FactCheckStage::new(llm.clone())))
        .add_stage(Arc::new(ScoringStage::new(llm.clone())))
        .build()
}

/// OCR followed by structured extraction, for admin case imports.
pub fn import_pipeline(llm: &LlmConfig) -> Pipeline {
    PipelineBuilder::new("case_import")
        .add_stage(Arc::new(PdfOcrStage::new(llm.clone())))
        .add_stage(Arc::new(CaseDraftStage::new(llm.clone())))
        .build()
}

/// Run the full two-pass evaluation over a (note, transcript) pair.
///
/// No retry and no partial result: if either stage fails or returns
/// unparseable JSON, the whole evaluation fails.
pub async fn run_soap_evaluation(
    pipeline: &Pipeline,
    soap: &SoapNote,
    messages: &[Message],
) -> anyhow::Result<SoapEvaluationResult> {
    let context = Context::new();
    context
        .set(session_keys::SOAP_TEXT, soap.as_sections_text())
        .await;
    context
        .set(session_keys::TRANSCRIPT, format_transcript(messages))
        .await;

    let result = pipeline.execute_transient(context.clone()).await?;
    if result.status != ExecutionStatus::Completed {
        bail!("evaluation pipeline stopped before completing");
    }

    context
        .get(session_keys::EVALUATION)
        .await
        .ok_or_else(|| anyhow!("evaluation pipeline produced no result"))
}

/// Run the import pipeline over an uploaded PDF, returning a short text
/// preview and the extracted case draft.
pub async fn run_case_import(
    pipeline: &Pipeline,
    pdf_path: &Path,
) -> anyhow::Result<(String, Case)> {
    let context = Context::new();
    context
        .set(session_keys::PDF_PATH, pdf_path.display().to_string())
        .await;

    let result = pipeline.execute_transient(context.clone()).await?;
    if result.status != ExecutionStatus::Completed {
        bail!("import pipeline stopped before completing");
    }

    let text: String = context
        .get(session_keys::EXTRACTED_TEXT)
        .await
        .ok_or_else(|| anyhow!("import pipeline produced no text"))?;
    let draft: Case = context
        .get(session_keys::CASE_DRAFT)
        .await
        .ok_or_else(|| anyhow!("import pipeline produced no case draft"))?;

    let preview = format!("{}...", truncate_chars(&text, 200));
    Ok((preview, draft))
}
