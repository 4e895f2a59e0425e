//! Errors surfaced by the target binary.

use notion_sink::SinkError;
use thiserror::Error;

/// Result type for the target binary.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that stop a run.
#[derive(Error, Debug)]
pub enum CliError {
    /// Reading input or writing state failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An input line is not a valid Singer message.
    #[error("invalid message on line {line}: {source}")]
    Message {
        /// 1-based input line number.
        line: usize,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The sink rejected the session (bad credentials or configuration).
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The HTTP client could not be built.
    #[error("transport setup failed: {0}")]
    Transport(String),
}
