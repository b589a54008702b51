//! Document import: PDF pages → images → LLM vision OCR → structured case
//! draft. Knowledge uploads reuse the OCR half and store the text as-is.

use anyhow::anyhow;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat};
use pdf2image::{PDF, Pages};
use reqwest::Client;
use rig::completion::Prompt;
use serde_json::{Value, json};
use sim_flow::{Context, FlowError, NextAction, Stage, StageResult};
use std::io::Cursor;
use tracing::info;

use crate::llm::{LlmConfig, authoring_agent, clean_json_reply};
use crate::models::Case;
use crate::prompts::{case_extraction_system_prompt, truncate_chars};
use crate::tasks::session_keys;

/// Character cap on document text handed to the extraction model.
const EXTRACTION_TEXT_CHARS: usize = 15000;

/// First import stage: render the uploaded PDF and OCR it with the vision
/// model.
pub struct PdfOcrStage {
    llm: LlmConfig,
}

impl PdfOcrStage {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for PdfOcrStage {
    fn id(&self) -> &str {
        "pdf_ocr"
    }

    async fn run(&self, context: Context) -> sim_flow::Result<StageResult> {
        let pdf_path: String = context
            .get(session_keys::PDF_PATH)
            .await
            .ok_or_else(|| FlowError::ContextError("pdf_path not found".to_string()))?;

        let text = extract_pdf_text(&self.llm, &pdf_path)
            .await
            .map_err(|e| FlowError::StageExecutionFailed(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(FlowError::StageExecutionFailed(
                "No text extracted from document".to_string(),
            ));
        }

        info!(chars = text.chars().count(), "OCR extracted document text");
        context.set(session_keys::EXTRACTED_TEXT, &text).await;

        Ok(StageResult::with_status(
            None,
            NextAction::ContinueAndExecute,
            "Document text extracted",
        ))
    }
}

/// Second import stage: turn the OCR text into a structured case draft for
/// admin review. The draft is returned to the caller, not persisted.
pub struct CaseDraftStage {
    llm: LlmConfig,
}

impl CaseDraftStage {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for CaseDraftStage {
    fn id(&self) -> &str {
        "case_draft"
    }

    async fn run(&self, context: Context) -> sim_flow::Result<StageResult> {
        let text: String = context
            .get(session_keys::EXTRACTED_TEXT)
            .await
            .ok_or_else(|| FlowError::ContextError("extracted_text not found".to_string()))?;

        let agent = authoring_agent(&self.llm, &case_extraction_system_prompt());
        let user_prompt = format!(
            "Here is the document text (truncated if too long):\n\n{}",
            truncate_chars(&text, EXTRACTION_TEXT_CHARS)
        );

        let raw = agent
            .prompt(&user_prompt)
            .await
            .map_err(|e| FlowError::StageExecutionFailed(format!("extraction call failed: {e}")))?;

        let draft: Case = serde_json::from_str(clean_json_reply(&raw)).map_err(|e| {
            FlowError::StageExecutionFailed(format!("extracted case was not valid JSON: {e}"))
        })?;

        info!(case_id = %draft.id, title = %draft.title, "Extracted case draft");
        context.set(session_keys::CASE_DRAFT, &draft).await;

        Ok(StageResult::with_status(
            None,
            NextAction::End,
            "Case draft extracted",
        ))
    }
}

/// PDF → images → LLM vision OCR → text.
pub async fn extract_pdf_text(llm: &LlmConfig, pdf_path: &str) -> anyhow::Result<String> {
    let images = convert_pdf_to_images(pdf_path).await?;
    if images.is_empty() {
        return Err(anyhow!("No pages rendered from PDF"));
    }
    info!("Rendered {} pages from PDF", images.len());
    extract_text_with_llm_vision(llm, &images).await
}

/// Render all PDF pages to images. Rendering is CPU-bound, so it runs on the
/// blocking pool.
async fn convert_pdf_to_images(pdf_path: &str) -> anyhow::Result<Vec<DynamicImage>> {
    if !tokio::fs::try_exists(pdf_path).await? {
        return Err(anyhow!("PDF file not found: {}", pdf_path));
    }

    let pdf_path_owned = pdf_path.to_string();
    let images = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<DynamicImage>> {
        let pdf =
            PDF::from_file(&pdf_path_owned).map_err(|e| anyhow!("Failed to load PDF: {}", e))?;
        let rendered = pdf
            .render(Pages::All, None)
            .map_err(|e| anyhow!("Failed to render PDF pages: {}", e))?;
        Ok(rendered)
    })
    .await??;

    Ok(images)
}

/// OCR all pages in a single vision call.
async fn extract_text_with_llm_vision(
    llm: &LlmConfig,
    images: &[DynamicImage],
) -> anyhow::Result<String> {
    let mut content = vec![json!({
        "type": "text",
        "text": format!(
            "You are an expert clinical document OCR system. I'm providing you with {} pages of a clinical case or guideline document written in Japanese or English. \
            Extract ALL text from these pages with perfect accuracy, preserving the exact structure, formatting, and medical terminology.\n\n\
            For each page, start with '=== Page X ===' as a header, then provide the extracted text. \
            Maintain the document's logical flow and structure across pages.\n\n\
            Return ONLY the extracted text without any commentary or explanations.",
            images.len()
        )
    })];

    for image in images {
        let base64_image = image_to_base64(image)?;
        content.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/png;base64,{}", base64_image)
            }
        }));
    }

    let text = call_openrouter_api(&llm.api_key, &llm.authoring_model, content, 4000).await?;
    info!(chars = text.chars().count(), "Vision OCR complete");
    Ok(text)
}

fn image_to_base64(image: &DynamicImage) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| anyhow!("Failed to encode image: {}", e))?;
    Ok(STANDARD.encode(&buffer))
}

/// Direct chat-completions call for the multimodal OCR request; the rig
/// agent API covers the text-only paths.
async fn call_openrouter_api(
    api_key: &str,
    model: &str,
    content: Vec<Value>,
    max_tokens: u32,
) -> anyhow::Result<String> {
    let client = Client::new();

    let payload = json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": content
            }
        ],
        "max_tokens": max_tokens
    });

    let response = client
        .post("https://openrouter.ai/api/v1/chat/completions")
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("LLM API request failed: {}", response.status()));
    }

    let response_json: Value = response.json().await?;
    let content = response_json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("Invalid response format from LLM"))?;

    Ok(content.to_string())
}
