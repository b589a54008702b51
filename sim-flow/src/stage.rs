use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{context::Context, error::Result};

/// Result of a stage execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Response to send back to the caller, if any
    pub response: Option<String>,
    /// What the pipeline should do next
    pub next_action: NextAction,
    /// Human-readable progress note, persisted on the session
    pub status_message: Option<String>,
    /// Set by the pipeline to the id of the stage that produced this result
    #[serde(default)]
    pub stage_id: String,
}

impl StageResult {
    pub fn new(response: Option<String>, next_action: NextAction) -> Self {
        Self {
            response,
            next_action,
            status_message: None,
            stage_id: String::new(),
        }
    }

    pub fn with_status(
        response: Option<String>,
        next_action: NextAction,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            response,
            next_action,
            status_message: Some(status_message.into()),
            stage_id: String::new(),
        }
    }
}

/// Defines what should happen after a stage completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NextAction {
    /// Advance to the next stage, but return control to the caller first
    Continue,
    /// Advance to the next stage and execute it immediately
    ContinueAndExecute,
    /// End the pipeline execution
    End,
}

/// Core trait implemented by every pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    /// Unique identifier for this stage
    fn id(&self) -> &str;

    /// Execute the stage with the given context
    async fn run(&self, context: Context) -> Result<StageResult>;
}
