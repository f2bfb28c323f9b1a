//! Error taxonomy for the duplication detection, ranking, and application
//! pipeline (§7).
//!
//! Every fallible operation in this crate returns a [`Result`] whose error
//! variant is one of the stable kinds below. Each variant has a `code()`
//! used to build the `{ error: { code, message, details? } }` envelope at
//! the tool/CLI boundary, and an `exit_code()` for driver scripts.

use std::path::PathBuf;

use thiserror::Error;

/// A single diagnostic produced by post-apply validation of one file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationDiagnostic {
    pub file: PathBuf,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("matcher binary not installed: {binary}")]
    ToolNotInstalled { binary: String },

    #[error("matcher exited with {exit_code:?}: {stderr_tail}")]
    ExecutionError {
        stderr_tail: String,
        exit_code: Option<i32>,
    },

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("integrity check failed for backup {backup_id}, entry {}", relative_path.display())]
    IntegrityFailure {
        backup_id: String,
        relative_path: PathBuf,
    },

    #[error("post-apply validation failed for {} file(s)", diagnostics.len())]
    ValidationFailure { diagnostics: Vec<ValidationDiagnostic> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("patch application error: {0}")]
    ApplyPatch(#[from] codeloom_apply_patch::ApplyPatchError),
}

impl Error {
    /// Stable string code for the tool-boundary error envelope (§7).
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::ToolNotInstalled { .. } => "tool_not_installed",
            Error::ExecutionError { .. } => "execution_error",
            Error::Timeout { .. } => "timeout",
            Error::IntegrityFailure { .. } => "integrity_failure",
            Error::ValidationFailure { .. } => "validation_failure",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApplyPatch(_) => "execution_error",
        }
    }

    /// Process exit code per spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidInput(_) => 1,
            Error::ToolNotInstalled { .. } => 2,
            Error::ExecutionError { .. } | Error::ApplyPatch(_) => 3,
            Error::Timeout { .. } => 4,
            Error::IntegrityFailure { .. } => 5,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
