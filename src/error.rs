//! Error types for the docpipe job pipeline.
//!
//! Every failure a job can hit is a [`PipelineError`]. What matters to the
//! pipeline is not the variant itself but its [`ErrorKind`], because the kind
//! decides what happens next:
//!
//! * [`ErrorKind::Validation`]: bad input count/type, missing parameter,
//!   unknown operation, missing input file. Never retried; the job fails at
//!   once and its inputs are released.
//! * [`ErrorKind::ExternalTool`]: a converter/compressor failed or wrote
//!   nothing. Retried with fixed backoff up to the configured cap.
//! * [`ErrorKind::Integrity`]: an output failed verification. Handled exactly
//!   like an external-tool failure.
//! * [`ErrorKind::ExhaustedRetries`]: terminal wrapper recorded once the cap
//!   is reached.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the docpipe library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The requested operation is not in the registry.
    #[error("Unsupported operation: {name}")]
    UnknownOperation { name: String },

    /// Input count, input type, or a parameter did not satisfy the operation.
    #[error("Invalid request for '{operation}': {reason}")]
    Validation { operation: String, reason: String },

    /// A staged input disappeared before the job could use it.
    #[error("Input file not found: '{path}'")]
    InputMissing { path: PathBuf },

    // ── Execution errors ──────────────────────────────────────────────────
    /// An external conversion tool failed or produced nothing.
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// In-process image decoding or encoding failed.
    #[error("Image processing failed for '{path}': {detail}")]
    Image { path: PathBuf, detail: String },

    /// Filesystem failure while executing a job.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A produced output did not pass the integrity verifier.
    #[error("Output '{path}' failed integrity check: {reason}")]
    Integrity { path: PathBuf, reason: String },

    // ── Terminal errors ───────────────────────────────────────────────────
    /// The job kept failing until the retry cap was reached.
    #[error("Job failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    // ── Queue errors ──────────────────────────────────────────────────────
    /// No job with this id exists (never submitted, or its result expired).
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The queue has shut down and no longer accepts work.
    #[error("Task queue is shut down")]
    QueueClosed,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification driving the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Validation,
    ExternalTool,
    Integrity,
    ExhaustedRetries,
    NotFound,
    Internal,
}

impl PipelineError {
    /// Shorthand for a [`PipelineError::Validation`].
    pub fn validation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Validation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`PipelineError::ExternalTool`].
    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::UnknownOperation { .. }
            | PipelineError::Validation { .. }
            | PipelineError::InputMissing { .. }
            | PipelineError::InvalidConfig(_) => ErrorKind::Validation,
            PipelineError::ExternalTool { .. }
            | PipelineError::Image { .. }
            | PipelineError::Io { .. } => ErrorKind::ExternalTool,
            PipelineError::Integrity { .. } => ErrorKind::Integrity,
            PipelineError::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
            PipelineError::JobNotFound(_) => ErrorKind::NotFound,
            PipelineError::QueueClosed | PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ExternalTool | ErrorKind::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let e = PipelineError::UnknownOperation {
            name: "teleport".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("teleport"));

        let e = PipelineError::InputMissing {
            path: PathBuf::from("/tmp/gone.pdf"),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn tool_and_integrity_errors_are_retryable() {
        assert!(PipelineError::tool("gs", "exit code 1").is_retryable());
        let e = PipelineError::Integrity {
            path: PathBuf::from("out.pdf"),
            reason: "zero bytes".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Integrity);
        assert!(e.is_retryable());
    }

    #[test]
    fn io_errors_count_as_tool_failures() {
        let e = PipelineError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(e.kind(), ErrorKind::ExternalTool);
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn exhausted_retries_display() {
        let e = PipelineError::ExhaustedRetries {
            attempts: 4,
            last_error: "wkhtmltopdf failed: crash".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("4 attempts"), "got: {msg}");
        assert!(!e.is_retryable());
    }
}
