//! Error types for the sheetcache worker binary

use std::path::PathBuf;

use sheetcache_core::SheetcacheError;
use thiserror::Error;

/// Errors that can occur while configuring or running the worker process
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing to read {}: file too large ({size} bytes, max {max})", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("Invalid value for {flag}: {value}")]
    InvalidArgument { flag: &'static str, value: String },

    #[error(transparent)]
    Core(#[from] SheetcacheError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
