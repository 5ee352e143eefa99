use crate::ports::{ExecutionError, ModelError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AskDbError {
    #[error("schema source yielded no tables: {0}")]
    SchemaEmpty(String),

    #[error("could not produce a safe query: {0}")]
    UnsafeQuery(String),

    #[error("could not reach the data source: {0}")]
    DataSource(String),

    #[error("investigation inconclusive: {0}")]
    Inconclusive(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AskDbError>;
