//! Error types for the docconv library.
//!
//! Two layers reflect two distinct questions a caller asks after a failure:
//!
//! * [`ConvertError`]: **what** went wrong (unsupported pair, missing
//!   backend, timeout, output never appeared). Adapters and the workspace
//!   manager return these directly.
//!
//! * [`ConversionFailure`]: **where** it went wrong. The orchestrator wraps
//!   every `ConvertError` with the [`Stage`] it was in and the backend it had
//!   selected, so the upload layer can decide whether to retry with different
//!   input (e.g. after removing PDF password protection).
//!
//! No variant is fatal to the orchestrator itself: a failed conversion never
//! leaves the service unable to serve the next request.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every way a single conversion can fail.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Routing errors ────────────────────────────────────────────────────
    /// No backend handles the requested (source, target) pair.
    #[error("Conversion from '{source_ext}' to '{target}' is not supported")]
    UnsupportedFormat { source_ext: String, target: String },

    /// The input was rejected before routing (empty, too large, …).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Base64 payload could not be decoded.
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    // ── Workspace errors ──────────────────────────────────────────────────
    /// Could not write the input bytes into the scratch directory.
    #[error("Failed to stage input at '{path}': {source}\nCheck free disk space and scratch directory permissions.")]
    StagingFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// Backend binary is missing or not executable.
    #[error("Backend '{backend}' is unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },

    /// Subprocess exceeded its time budget and was killed.
    #[error("Backend '{backend}' timed out after {timeout_ms}ms and was terminated")]
    ConversionTimeout { backend: String, timeout_ms: u64 },

    /// Non-zero exit, or the backend reported an internal failure.
    #[error("Backend '{backend}' failed (exit code {}): {diagnostic}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
    ConversionProcessError {
        backend: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// The backend exited but its output file never appeared.
    #[error("Backend '{backend}' produced no output at '{expected}' (scratch entries: [{}])", .listing.join(", "))]
    NotProduced {
        backend: String,
        expected: PathBuf,
        listing: Vec<String>,
    },

    /// The output file exists but is zero bytes long.
    #[error("Backend '{backend}' produced an empty file at '{path}'")]
    EmptyOutput { backend: String, path: PathBuf },

    /// The resolved output could not be read back into memory.
    #[error("Failed to read output file '{path}': {source}")]
    OutputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converted bytes could not be written to their destination.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or config-file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Short machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::UnsupportedFormat { .. } => "unsupported_format",
            ConvertError::InvalidInput(_) => "invalid_input",
            ConvertError::InvalidBase64(_) => "invalid_base64",
            ConvertError::StagingFailure { .. } => "staging_failure",
            ConvertError::BackendUnavailable { .. } => "backend_unavailable",
            ConvertError::ConversionTimeout { .. } => "conversion_timeout",
            ConvertError::ConversionProcessError { .. } => "conversion_process_error",
            ConvertError::NotProduced { .. } => "not_produced",
            ConvertError::EmptyOutput { .. } => "empty_output",
            ConvertError::OutputReadFailed { .. } => "output_read_failed",
            ConvertError::OutputWriteFailed { .. } => "output_write_failed",
            ConvertError::InvalidConfig(_) => "invalid_config",
            ConvertError::Internal(_) => "internal",
        }
    }
}

/// Orchestrator state in which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Routed,
    Staged,
    Converting,
    Resolved,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::Routed => "routed",
            Stage::Staged => "staged",
            Stage::Converting => "converting",
            Stage::Resolved => "resolved",
            Stage::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A failed conversion: the error plus the stage and backend it happened in.
///
/// Never partially populated alongside a result: `convert` returns either
/// a full [`crate::output::ConversionOutput`] or one of these.
#[derive(Debug, Error)]
#[error("Conversion failed at stage {stage}{}: {error}", .backend.as_deref().map(|b| format!(" ({b})")).unwrap_or_default())]
pub struct ConversionFailure {
    /// Last state the request reached before failing.
    pub stage: Stage,
    /// Backend selected by the registry, if routing succeeded.
    pub backend: Option<String>,
    #[source]
    pub error: ConvertError,
}

impl ConversionFailure {
    pub fn new(stage: Stage, backend: Option<&str>, error: ConvertError) -> Self {
        Self {
            stage,
            backend: backend.map(str::to_string),
            error,
        }
    }

    /// Human-readable diagnostic suitable for an API error body.
    pub fn diagnostic_message(&self) -> String {
        self.error.to_string()
    }

    /// Whether the caller may reasonably retry with *different* input.
    ///
    /// Infrastructure problems (missing binary, unwritable scratch dir, bad
    /// config) will fail identically regardless of the document uploaded.
    pub fn is_retryable_with_different_input(&self) -> bool {
        !matches!(
            self.error,
            ConvertError::BackendUnavailable { .. }
                | ConvertError::StagingFailure { .. }
                | ConvertError::OutputWriteFailed { .. }
                | ConvertError::InvalidConfig(_)
                | ConvertError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = ConvertError::UnsupportedFormat {
            source_ext: "docx".into(),
            target: "xml".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("docx"), "got: {msg}");
        assert!(msg.contains("xml"), "got: {msg}");
        assert_eq!(e.kind(), "unsupported_format");
    }

    #[test]
    fn process_error_display_without_exit_code() {
        let e = ConvertError::ConversionProcessError {
            backend: "office-suite".into(),
            exit_code: None,
            diagnostic: "killed by signal".into(),
        };
        assert!(e.to_string().contains("exit code none"));
    }

    #[test]
    fn timeout_display() {
        let e = ConvertError::ConversionTimeout {
            backend: "pdf-to-word".into(),
            timeout_ms: 120_000,
        };
        assert!(e.to_string().contains("120000ms"));
        assert!(e.to_string().contains("pdf-to-word"));
    }

    #[test]
    fn not_produced_lists_entries() {
        let e = ConvertError::NotProduced {
            backend: "office-suite".into(),
            expected: PathBuf::from("/tmp/x/a.pdf"),
            listing: vec!["a.docx".into(), "b.txt".into()],
        };
        assert!(e.to_string().contains("a.docx, b.txt"));
    }

    #[test]
    fn failure_display_includes_stage_and_backend() {
        let f = ConversionFailure::new(
            Stage::Converting,
            Some("office-suite"),
            ConvertError::EmptyOutput {
                backend: "office-suite".into(),
                path: PathBuf::from("/tmp/out.pdf"),
            },
        );
        let msg = f.to_string();
        assert!(msg.contains("stage converting (office-suite)"), "got: {msg}");
        assert!(f.is_retryable_with_different_input());
    }

    #[test]
    fn infrastructure_failures_are_not_retryable() {
        let f = ConversionFailure::new(
            Stage::Converting,
            Some("office-suite"),
            ConvertError::BackendUnavailable {
                backend: "office-suite".into(),
                detail: "soffice not found".into(),
            },
        );
        assert!(!f.is_retryable_with_different_input());
    }
}
