//! Error types for the query-and-presentation engine.
//!
//! The command layer uses `anyhow`; these typed errors are what the engine
//! itself returns so callers can tell a bad filter expression apart from a
//! failed fetch or a broken output stream.

use thiserror::Error;

/// A filter expression could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid filter expression '{expression}': {reason}")]
pub struct FilterParseError {
    pub expression: String,
    pub reason: String,
}

impl FilterParseError {
    pub(crate) fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while fetching or rendering records.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to fetch linked trace {trace_id}: {source}")]
    Fetch {
        trace_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write output: {0}")]
    Render(#[from] std::io::Error),

    #[error("failed to write CSV output: {0}")]
    Csv(#[from] csv::Error),
}
