pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod storage;

// Re-export commonly used types
pub use context::{ChatMessage, ChatRole, Context};
pub use error::{FlowError, Result};
pub use pipeline::{ExecutionResult, ExecutionStatus, Pipeline, PipelineBuilder};
pub use stage::{NextAction, Stage, StageResult};
pub use storage::{InMemorySessionStorage, Session, SessionStorage};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoStage {
        id: String,
        next: NextAction,
    }

    #[async_trait]
    impl Stage for EchoStage {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> Result<StageResult> {
            let input: String = context.get("input").await.unwrap_or_default();
            let mut trace: Vec<String> = context.get("trace").await.unwrap_or_default();
            trace.push(self.id.clone());
            context.set("trace", &trace).await;
            context.set("output", format!("{}:{}", self.id, input)).await;

            Ok(StageResult::new(
                Some(format!("{} done", self.id)),
                self.next.clone(),
            ))
        }
    }

    #[tokio::test]
    async fn test_single_stage_execution() {
        let stage = Arc::new(EchoStage {
            id: "only".to_string(),
            next: NextAction::End,
        });
        let pipeline = PipelineBuilder::new("test").add_stage(stage).build();

        let context = Context::new();
        context.set("input", "hello").await;

        let result = pipeline.execute_transient(context.clone()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.response.as_deref(), Some("only done"));
        let output: String = context.get("output").await.unwrap();
        assert_eq!(output, "only:hello");
    }

    #[tokio::test]
    async fn test_chained_stages_share_context() {
        let pipeline = PipelineBuilder::new("chained")
            .add_stage(Arc::new(EchoStage {
                id: "first".to_string(),
                next: NextAction::ContinueAndExecute,
            }))
            .add_stage(Arc::new(EchoStage {
                id: "second".to_string(),
                next: NextAction::End,
            }))
            .build();

        let context = Context::new();
        let result = pipeline.execute_transient(context.clone()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        let trace: Vec<String> = context.get("trace").await.unwrap();
        assert_eq!(trace, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_continue_pauses_between_stages() {
        let pipeline = PipelineBuilder::new("paused")
            .add_stage(Arc::new(EchoStage {
                id: "ask".to_string(),
                next: NextAction::Continue,
            }))
            .add_stage(Arc::new(EchoStage {
                id: "answer".to_string(),
                next: NextAction::End,
            }))
            .build();

        let mut session = Session::new_from_stage("s1".to_string(), "ask");
        let first = pipeline.execute_session(&mut session).await.unwrap();
        assert_eq!(first.status, ExecutionStatus::WaitingForInput);
        assert_eq!(session.current_stage_id, "answer");

        let second = pipeline.execute_session(&mut session).await.unwrap();
        assert_eq!(second.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_an_error() {
        let pipeline = PipelineBuilder::new("empty")
            .add_stage(Arc::new(EchoStage {
                id: "a".to_string(),
                next: NextAction::End,
            }))
            .build();

        let mut session = Session::new_from_stage("s1".to_string(), "missing");
        let err = pipeline.execute_session(&mut session).await.unwrap_err();
        assert!(matches!(err, FlowError::StageNotFound(_)));
    }

    #[tokio::test]
    async fn test_context_chat_history() {
        let context = Context::new();
        context.add_user_message("こんにちは").await;
        context.add_assistant_message("どうされましたか").await;
        context.add_message(ChatMessage::system("note")).await;

        let all = context.messages().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].role, ChatRole::User);
        assert_eq!(all[1].role, ChatRole::Assistant);

        let last = context.last_messages(2).await;
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].content, "どうされましたか");
    }

    #[tokio::test]
    async fn test_session_storage_roundtrip() {
        let storage = InMemorySessionStorage::new();
        let session = Session::new_from_stage("session1".to_string(), "stage1");
        session.context.set("case_id", "case_a").await;

        storage.save(session).await.unwrap();

        let loaded = storage.get("session1").await.unwrap().unwrap();
        assert_eq!(loaded.current_stage_id, "stage1");
        let case_id: String = loaded.context.get("case_id").await.unwrap();
        assert_eq!(case_id, "case_a");

        storage.delete("session1").await.unwrap();
        assert!(storage.get("session1").await.unwrap().is_none());
    }
}
