//! Result types returned by a successful conversion.

use crate::format::DocumentFormat;
use serde::Serialize;

/// A completed conversion.
///
/// Only ever constructed in full: if any stage fails the caller receives a
/// [`crate::error::ConversionFailure`] instead.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Converted document bytes.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Download name: original stem + output extension (`report.docx`).
    pub file_name: String,
    /// Format of `bytes`. Differs from the requested target only when the
    /// PDF-to-Word backend was asked for `doc`/`odt`, as it always writes DOCX.
    pub format: DocumentFormat,
    /// MIME type for `format`.
    pub mime_type: &'static str,
    /// Name of the backend that produced the output.
    pub backend: String,
    /// Request id that namespaced the scratch files.
    pub request_id: String,
    pub stats: ConversionStats,
}

/// Timings and sizes for one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Wall-clock time spent inside the backend subprocess.
    pub backend_duration_ms: u64,
    /// Wall-clock time for the whole request.
    pub total_duration_ms: u64,
}

/// Base64 form of a conversion, for JSON transports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Base64Output {
    pub success: bool,
    pub data: String,
    pub file_name: String,
    pub format: DocumentFormat,
    pub mime_type: &'static str,
    pub original_size: u64,
    pub converted_size: u64,
}
