//! Error taxonomy for external completion calls.
//!
//! Everything else in the crate propagates `anyhow::Error`; completion
//! failures get a closed enum so callers can tell cancellation apart from
//! retry exhaustion.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompletionError {
    /// The caller's cancellation token fired.
    #[error("completion cancelled")]
    Cancelled,

    /// One attempt exceeded its own timeout.
    #[error("completion attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint answered with a non-success status.
    #[error("completion API error {status}: {body}")]
    Status { status: u16, body: String },

    /// The response carried no choices.
    #[error("no response from completion model")]
    EmptyChoices,

    #[error("completion transport error: {0}")]
    Transport(String),

    #[error("invalid completion response: {0}")]
    Decode(String),

    /// The client is not configured.
    #[error("completion provider unavailable: {0}")]
    Unavailable(String),

    /// Every attempt failed; wraps the last attempt's error.
    #[error("failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<CompletionError>,
    },
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }

    /// Whether another attempt could succeed. Misconfiguration and
    /// cancellation are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CompletionError::Cancelled
                | CompletionError::Unavailable(_)
                | CompletionError::Exhausted { .. }
        )
    }

    /// No later attempt, at any level, can succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CompletionError::Unavailable(_))
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CompletionError::Decode(err.to_string())
        } else {
            CompletionError::Transport(err.to_string())
        }
    }
}
