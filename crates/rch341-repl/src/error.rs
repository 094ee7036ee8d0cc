//! Error types for the REPL

use thiserror::Error;

/// Errors that can occur in the REPL
#[derive(Error, Debug)]
pub enum ReplError {
    /// I/O error (terminal, history or script file)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Steel evaluation error
    #[error("Scheme error: {0}")]
    SteelError(String),
}
