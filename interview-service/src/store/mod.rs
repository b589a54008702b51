pub mod case;
pub mod knowledge;

use thiserror::Error;

pub use case::{CaseRepository, CaseStore, FileCaseStore, PostgresCaseStore, builtin_cases};
pub use knowledge::{
    FileKnowledgeStore, InMemoryKnowledgeStore, KnowledgeStore, PostgresKnowledgeStore,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
