//! Error types for Sheetcache core.

use thiserror::Error;

use rhai::EvalAltResult;

use crate::protocol::RequestId;

/// Errors that can occur while evaluating formulas or driving the worker.
#[derive(Error, Debug)]
pub enum SheetcacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Formula error: {0}")]
    Rhai(
        #[from]
        #[source]
        Box<EvalAltResult>,
    ),

    #[error("Rhai compile error: {0}")]
    RhaiCompile(String),

    #[error("Unsupported formula result: {0}")]
    UnsupportedResult(String),

    #[error("Invalid cache config: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker is not running")]
    WorkerStopped,

    #[error("No request in flight with id {0}")]
    UnknownRequestId(RequestId),

    #[error("Request id {0} is already in flight")]
    DuplicateRequestId(RequestId),
}

pub type Result<T> = std::result::Result<T, SheetcacheError>;
