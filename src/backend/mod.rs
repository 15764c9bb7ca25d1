//! Backend adapters: the only code that spawns conversion subprocesses.
//!
//! ```text
//! orchestrator ──▶ ConversionBackend::convert ──▶ process::run ──▶ child
//!                   ├─ office      (soffice --convert-to, output discovered)
//!                   └─ pdf_to_word (pdf2word in out, JSON report on stdout)
//! ```
//!
//! Adapters are stateless: every `convert` call builds its own argument
//! vector and spawns its own process, so one adapter instance is shared by
//! all concurrent requests. Commands are always argument vectors; no shell
//! ever sees a user-influenced file name.

pub mod office;
pub mod pdf_to_word;
pub mod process;

use crate::context::RequestContext;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::registry::BackendId;
use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use office::OfficeSuiteBackend;
pub use pdf_to_word::PdfToWordBackend;

/// Longest directory listing carried in a `NotProduced` error.
const MAX_LISTING: usize = 20;

/// Everything an adapter needs for one conversion.
#[derive(Debug, Clone, Copy)]
pub struct BackendJob<'a> {
    /// Staged, request-qualified input file.
    pub input: &'a Path,
    pub source: DocumentFormat,
    pub target: DocumentFormat,
    /// Directory the backend should write into.
    pub output_dir: &'a Path,
    /// Exact output path, for backends that can be told one.
    pub output_path: &'a Path,
    /// Private scratch directory for backend state (office user profile).
    pub profile_dir: &'a Path,
    pub timeout: Duration,
}

/// Result of a health probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStatus {
    pub available: bool,
    pub version: Option<String>,
    /// Executable that answered the probe.
    pub binary: Option<String>,
    pub error: Option<String>,
}

/// A conversion backend.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    fn id(&self) -> BackendId;

    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Format actually written for a requested target.
    fn output_format(&self, target: DocumentFormat) -> DocumentFormat {
        target
    }

    /// Convert `job.input`; returns the path of a non-empty output file.
    async fn convert(
        &self,
        job: &BackendJob<'_>,
        ctx: &RequestContext,
    ) -> Result<PathBuf, ConvertError>;

    /// Check the backend can be invoked, without converting anything.
    async fn probe(&self, timeout: Duration) -> BackendStatus;
}

/// Confirm `path` exists and is non-empty.
///
/// A zero exit code does not guarantee a usable file, so every adapter
/// finishes with this check.
pub(crate) async fn verify_output(backend: &str, path: &Path) -> Result<u64, ConvertError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(meta) if meta.is_file() => Err(ConvertError::EmptyOutput {
            backend: backend.to_string(),
            path: path.to_path_buf(),
        }),
        Ok(_) | Err(_) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            Err(ConvertError::NotProduced {
                backend: backend.to_string(),
                expected: path.to_path_buf(),
                listing: list_dir(dir, MAX_LISTING).await,
            })
        }
    }
}

/// Names of up to `limit` entries in `dir`, sorted, for diagnostics.
pub(crate) async fn list_dir(dir: &Path, limit: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) => return vec![format!("<unreadable: {e}>")],
    };
    while names.len() < limit {
        match entries.next_entry().await {
            Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().into_owned()),
            Ok(None) => break,
            Err(e) => {
                names.push(format!("<error: {e}>"));
                break;
            }
        }
    }
    names.sort();
    names
}

/// `true` for spawn errors meaning "this executable is not usable here".
pub(crate) fn is_unavailable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}
