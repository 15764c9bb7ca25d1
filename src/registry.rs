//! Backend capability registry: which backend handles which format pair.
//!
//! Routing policy is a static table plus one pure function, so it can be
//! unit-tested without spawning anything and changed without touching the
//! subprocess code in [`crate::backend`].
//!
//! Resolution order:
//!
//! 1. `pdf` → `docx | doc | odt` goes to the structured PDF-to-Word backend.
//!    A generic office-suite PDF import re-renders pages as positioned
//!    frames and loses paragraph flow, so it is never used for this pair.
//! 2. Everything else goes to the office-suite backend.
//!
//! Exactly one backend is selected per request.

use crate::error::ConvertError;
use crate::format::DocumentFormat;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Identifies one of the two backend adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    OfficeSuite,
    PdfToWord,
}

impl BackendId {
    pub fn name(self) -> &'static str {
        match self {
            BackendId::OfficeSuite => "office-suite",
            BackendId::PdfToWord => "pdf-to-word",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of what a backend can do.
#[derive(Debug, Serialize)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub name: &'static str,
    pub source_kinds: &'static [DocumentFormat],
    pub target_formats: &'static [DocumentFormat],
    /// Used when the config does not override the backend's timeout.
    #[serde(skip)]
    pub default_timeout: Duration,
}

impl BackendDescriptor {
    pub fn supports(&self, source: DocumentFormat, target: DocumentFormat) -> bool {
        self.source_kinds.contains(&source) && self.target_formats.contains(&target)
    }
}

pub static PDF_TO_WORD: BackendDescriptor = BackendDescriptor {
    id: BackendId::PdfToWord,
    name: "pdf-to-word",
    source_kinds: &[DocumentFormat::Pdf],
    target_formats: &[DocumentFormat::Docx, DocumentFormat::Doc, DocumentFormat::Odt],
    default_timeout: Duration::from_secs(120),
};

pub static OFFICE_SUITE: BackendDescriptor = BackendDescriptor {
    id: BackendId::OfficeSuite,
    name: "office-suite",
    source_kinds: DocumentFormat::SOURCES,
    target_formats: DocumentFormat::TARGETS,
    default_timeout: Duration::from_secs(60),
};

/// Routing table, in priority order. The first descriptor that supports a
/// pair wins.
pub static REGISTRY: &[&BackendDescriptor] = &[&PDF_TO_WORD, &OFFICE_SUITE];

/// Look up the backend responsible for `source_ext → target`.
///
/// Both arguments are raw extensions as received from the caller; they are
/// parsed case-insensitively. Fails with [`ConvertError::UnsupportedFormat`]
/// if either is unknown or no backend supports the pair.
pub fn resolve(source_ext: &str, target: &str) -> Result<&'static BackendDescriptor, ConvertError> {
    let unsupported = || ConvertError::UnsupportedFormat {
        source_ext: source_ext.trim().trim_start_matches('.').to_ascii_lowercase(),
        target: target.trim().trim_start_matches('.').to_ascii_lowercase(),
    };

    let source: DocumentFormat = source_ext.parse().map_err(|_| unsupported())?;
    let target: DocumentFormat = target.parse().map_err(|_| unsupported())?;

    resolve_formats(source, target).ok_or_else(unsupported)
}

/// Typed variant of [`resolve`].
pub fn resolve_formats(
    source: DocumentFormat,
    target: DocumentFormat,
) -> Option<&'static BackendDescriptor> {
    REGISTRY.iter().copied().find(|d| d.supports(source, target))
}

/// All supported `(source, target, backend)` triples, for diagnostics and tests.
pub fn capability_matrix() -> Vec<(DocumentFormat, DocumentFormat, BackendId)> {
    let mut out = Vec::new();
    for &source in DocumentFormat::SOURCES {
        for &target in DocumentFormat::TARGETS {
            if let Some(d) = resolve_formats(source, target) {
                out.push((source, target, d.id));
            }
        }
    }
    out
}
