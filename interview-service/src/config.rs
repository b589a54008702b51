use std::path::PathBuf;

use anyhow::Context as _;

use crate::llm::LlmConfig;

/// Everything the service reads from the environment, resolved once at
/// startup and passed down explicitly. Handlers and tasks never touch the
/// environment themselves.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub database_url: Option<String>,
    pub cases_dir: PathBuf,
    pub knowledge_dir: PathBuf,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable is required")?;

        let chat_model =
            std::env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
        let authoring_model =
            std::env::var("LLM_AUTHORING_MODEL").unwrap_or_else(|_| "openai/gpt-4o".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .unwrap_or(3000);

        Ok(Self {
            llm: LlmConfig {
                api_key,
                chat_model,
                authoring_model,
            },
            database_url: std::env::var("DATABASE_URL").ok(),
            cases_dir: std::env::var("CASES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/cases")),
            knowledge_dir: std::env::var("KNOWLEDGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/knowledge")),
            port,
        })
    }
}
