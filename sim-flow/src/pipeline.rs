use std::sync::Arc;

use crate::{
    context::Context,
    error::{FlowError, Result},
    stage::{NextAction, Stage, StageResult},
    storage::Session,
};

/// An ordered sequence of stages executed against a shared context.
///
/// Unlike a general task graph there is no branching: every pipeline in this
/// system runs its stages front to back, and a stage decides only whether the
/// pipeline pauses, advances, or ends after it.
pub struct Pipeline {
    pub id: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stages: Vec::new(),
        }
    }

    pub fn add_stage(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Id of the first stage, if any
    pub fn start_stage_id(&self) -> Option<&str> {
        self.stages.first().map(|s| s.id())
    }

    pub fn get_stage(&self, stage_id: &str) -> Option<Arc<dyn Stage>> {
        self.stages
            .iter()
            .find(|s| s.id() == stage_id)
            .map(Arc::clone)
    }

    fn position(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.id() == stage_id)
    }

    /// Execute the pipeline for a session, starting at its current stage.
    ///
    /// `ContinueAndExecute` chains into the next stage within this call;
    /// `Continue` advances the session but returns control to the caller;
    /// `End` (or running past the last stage) completes the execution.
    pub async fn execute_session(&self, session: &mut Session) -> Result<ExecutionResult> {
        let mut index = self
            .position(&session.current_stage_id)
            .ok_or_else(|| FlowError::StageNotFound(session.current_stage_id.clone()))?;

        loop {
            let stage = &self.stages[index];
            let mut result = stage.run(session.context.clone()).await?;
            result.stage_id = stage.id().to_string();
            session.status_message = result.status_message.clone();

            tracing::debug!(
                pipeline_id = %self.id,
                stage_id = %result.stage_id,
                next_action = ?result.next_action,
                "Stage executed"
            );

            let next_action = result.next_action.clone();
            match next_action {
                NextAction::Continue => {
                    session.current_stage_id = self.advance_from(index);
                    return Ok(ExecutionResult {
                        response: result.response,
                        status: ExecutionStatus::WaitingForInput,
                    });
                }
                NextAction::ContinueAndExecute => {
                    if index + 1 < self.stages.len() {
                        index += 1;
                        session.current_stage_id = self.stages[index].id().to_string();
                    } else {
                        return Ok(self.complete(session, result));
                    }
                }
                NextAction::End => {
                    return Ok(self.complete(session, result));
                }
            }
        }
    }

    fn advance_from(&self, index: usize) -> String {
        self.stages
            .get(index + 1)
            .unwrap_or(&self.stages[index])
            .id()
            .to_string()
    }

    fn complete(&self, session: &mut Session, result: StageResult) -> ExecutionResult {
        session.current_stage_id = result.stage_id.clone();
        ExecutionResult {
            response: result.response,
            status: ExecutionStatus::Completed,
        }
    }

    /// Run the whole pipeline over a fresh session and context.
    ///
    /// Convenience for one-shot pipelines (evaluation, document import) where
    /// no session persistence is involved. The caller seeds the context,
    /// stages communicate through it, and the final context is returned with
    /// the execution result.
    pub async fn execute_transient(&self, context: Context) -> Result<ExecutionResult> {
        let start = self
            .start_stage_id()
            .ok_or_else(|| FlowError::StageNotFound(format!("{} has no stages", self.id)))?
            .to_string();
        let mut session = Session::new_from_stage(uuid::Uuid::new_v4().to_string(), &start);
        session.pipeline_id = self.id.clone();
        session.context = context;
        self.execute_session(&mut session).await
    }
}

/// Builder for creating pipelines
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline::new(id),
        }
    }

    pub fn add_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.pipeline.add_stage(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}

/// Outcome of a pipeline execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Paused; the session's current stage runs on the next call
    WaitingForInput,
    /// All stages ran to completion
    Completed,
}
