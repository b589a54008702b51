use async_trait::async_trait;
use rig::completion::Prompt;
use sim_flow::{Context, FlowError, NextAction, Stage, StageResult};
use tracing::info;

use crate::evaluation::FactCheckResult;
use crate::llm::{LlmConfig, chat_agent_with_temperature, clean_json_reply};
use crate::prompts::fact_check_system_prompt;
use crate::tasks::session_keys;

/// Pass A of the SOAP evaluation: align every note statement against the
/// interview transcript and emit supported / missing / unsupported claims.
/// Runs at temperature 0; the auditor must not improvise.
pub struct FactCheckStage {
    llm: LlmConfig,
}

impl FactCheckStage {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for FactCheckStage {
    fn id(&self) -> &str {
        "fact_check"
    }

    async fn run(&self, context: Context) -> sim_flow::Result<StageResult> {
        let transcript: String = context
            .get(session_keys::TRANSCRIPT)
            .await
            .ok_or_else(|| FlowError::ContextError("transcript not found".to_string()))?;
        let soap_text: String = context
            .get(session_keys::SOAP_TEXT)
            .await
            .ok_or_else(|| FlowError::ContextError("soap_text not found".to_string()))?;

        let agent =
            chat_agent_with_temperature(&self.llm, &fact_check_system_prompt(&transcript), 0.0);
        let user_prompt = format!(
            "以下を突き合わせ、SOAPの各文が面接ログで裏付けられるか判定し、JSONで出力してください。\n\n【soap_note】\n{soap_text}"
        );

        let raw = agent
            .prompt(&user_prompt)
            .await
            .map_err(|e| FlowError::StageExecutionFailed(format!("fact-check call failed: {e}")))?;

        let result: FactCheckResult = serde_json::from_str(clean_json_reply(&raw)).map_err(|e| {
            FlowError::StageExecutionFailed(format!("fact-check reply was not valid JSON: {e}"))
        })?;

        info!(
            supported = result.supported_claims.len(),
            missing = result.missing_from_soap.len(),
            unsupported = result.hallucination_risk.len(),
            "Fact check complete"
        );

        context.set(session_keys::FACT_CHECK, &result).await;

        Ok(StageResult::with_status(
            None,
            NextAction::ContinueAndExecute,
            "Fact check complete, scoring next",
        ))
    }
}
