//! Collaborator contracts
//!
//! The core never talks to a network or a database directly; it goes through
//! these two traits. Both are implemented in-crate (`llm::LlmClient`,
//! `executor::SqliteExecutor`) and by scripted mocks in the test suite.

use async_trait::async_trait;
use thiserror::Error;

/// One result row: column name -> value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Failure modes of the model collaborator. Callers retry `Transient`
/// failures exactly once; `Fatal` aborts the current stage.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("transient model failure: {0}")]
    Transient(String),

    #[error("model failure: {0}")]
    Fatal(String),
}

/// Opaque text-completion capability.
#[async_trait]
pub trait ModelPort: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ModelError>;
}

/// Failure modes of the execution port. `Query` means the engine rejected
/// this statement (the round degrades, the loop continues); `Unavailable`
/// means the data source itself cannot be reached (one retry, then the
/// whole investigation fails with partial history).
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only SQL execution against the target database.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;
}
