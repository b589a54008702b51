use async_trait::async_trait;
use rig::completion::Prompt;
use sim_flow::{Context, FlowError, NextAction, Stage, StageResult};
use tracing::info;

use crate::evaluation::{FactCheckResult, ScoringOutcome, SoapEvaluationResult};
use crate::llm::{LlmConfig, chat_agent_with_temperature, clean_json_reply};
use crate::prompts::scoring_system_prompt;
use crate::tasks::session_keys;

/// Pass B of the SOAP evaluation: score the note under Q-NOTE and PDQI-8,
/// explicitly conditioned on pass A's serialized output. High scores are
/// withheld by the prompt unless the fact check shows strong support.
pub struct ScoringStage {
    llm: LlmConfig,
}

impl ScoringStage {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for ScoringStage {
    fn id(&self) -> &str {
        "scoring"
    }

    async fn run(&self, context: Context) -> sim_flow::Result<StageResult> {
        let fact_check: FactCheckResult = context
            .get(session_keys::FACT_CHECK)
            .await
            .ok_or_else(|| FlowError::ContextError("fact_check not found".to_string()))?;
        let soap_text: String = context
            .get(session_keys::SOAP_TEXT)
            .await
            .ok_or_else(|| FlowError::ContextError("soap_text not found".to_string()))?;

        let fact_check_json = serde_json::to_string_pretty(&fact_check)
            .map_err(|e| FlowError::StageExecutionFailed(e.to_string()))?;

        let agent =
            chat_agent_with_temperature(&self.llm, &scoring_system_prompt(&fact_check_json), 0.3);
        let user_prompt = format!(
            "以下のSOAPノートを、事実照合結果に基づいて評価し、JSONで出力してください。\n\n【soap_note】\n{soap_text}"
        );

        let raw = agent
            .prompt(&user_prompt)
            .await
            .map_err(|e| FlowError::StageExecutionFailed(format!("scoring call failed: {e}")))?;

        let mut outcome: ScoringOutcome =
            serde_json::from_str(clean_json_reply(&raw)).map_err(|e| {
                FlowError::StageExecutionFailed(format!("scoring reply was not valid JSON: {e}"))
            })?;

        outcome
            .validate()
            .map_err(|e| FlowError::StageExecutionFailed(e.to_string()))?;
        outcome.recompute_totals();

        info!(
            q_note_total = outcome.totals.q_note_total,
            pdqi_total = outcome.totals.pdqi_total,
            "Scoring complete"
        );

        let result = SoapEvaluationResult::from_parts(outcome, fact_check);
        context.set(session_keys::EVALUATION, &result).await;

        Ok(StageResult::with_status(
            None,
            NextAction::End,
            "SOAP evaluation complete",
        ))
    }
}
