//! Error types for the CLI

use core_types::TemplateError;

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Template compile or render error
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// File I/O error
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed context file
    #[error("Context error: {0}")]
    Context(#[from] serde_json::Error),

    /// Context file parsed but is not an object
    #[error("Context error: expected a JSON object, got {0}")]
    ContextShape(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Template(_) => 1,
            CliError::Io(_) => 2,
            CliError::Context(_) | CliError::ContextShape(_) => 3,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
