//! Structured PDF-to-Word adapter.
//!
//! Runs an external converter as `<program> <args…> <input.pdf> <output.docx>`.
//! The converter reconstructs paragraphs, tables and images rather than
//! re-rendering pages, and always writes DOCX. On its last non-empty stdout
//! line it prints a JSON report:
//!
//! ```json
//! {"success": true, "message": "Converted successfully"}
//! {"success": false, "error": "Encrypted PDF"}
//! ```
//!
//! The report is authoritative: `success: false` is a failure even when the
//! process exits 0, and a clean exit with no report at all is also treated
//! as a failure.

use super::process;
use super::{verify_output, BackendJob, BackendStatus, ConversionBackend};
use crate::config::OrchestratorConfig;
use crate::context::RequestContext;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::registry::BackendId;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// The converter's stdout report.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConverterReport {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Structured converter invoked through an interpreter.
#[derive(Debug, Clone)]
pub struct PdfToWordBackend {
    program: String,
    args: Vec<String>,
}

impl PdfToWordBackend {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.pdf_to_word_program.clone(),
            config.pdf_to_word_args.clone(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl ConversionBackend for PdfToWordBackend {
    fn id(&self) -> BackendId {
        BackendId::PdfToWord
    }

    fn output_format(&self, _target: DocumentFormat) -> DocumentFormat {
        DocumentFormat::Docx
    }

    async fn convert(
        &self,
        job: &BackendJob<'_>,
        ctx: &RequestContext,
    ) -> Result<PathBuf, ConvertError> {
        let backend = self.name();
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(job.input).arg(job.output_path);

        ctx.observer()
            .on_backend_spawn(ctx.request_id(), backend, &self.program);
        let output = process::run(cmd, backend, job.timeout).await?;
        let report = parse_report(&output.stdout);
        debug!(backend, report = ?report, "Converter finished");

        match report {
            Some(report) if !report.success => Err(ConvertError::ConversionProcessError {
                backend: backend.to_string(),
                exit_code: output.status.code(),
                diagnostic: report
                    .error
                    .or(report.message)
                    .unwrap_or_else(|| "converter reported failure".to_string()),
            }),
            _ if !output.status.success() => Err(ConvertError::ConversionProcessError {
                backend: backend.to_string(),
                exit_code: output.status.code(),
                diagnostic: output.diagnostic(),
            }),
            None => Err(ConvertError::ConversionProcessError {
                backend: backend.to_string(),
                exit_code: output.status.code(),
                diagnostic: format!(
                    "converter exited without a result report: {}",
                    output.diagnostic()
                ),
            }),
            Some(_) => {
                verify_output(backend, job.output_path).await?;
                Ok(job.output_path.to_path_buf())
            }
        }
    }

    async fn probe(&self, timeout: Duration) -> BackendStatus {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--version");
        match process::run(cmd, self.name(), timeout).await {
            Ok(out) if out.status.success() => {
                // Some interpreters print the version on stderr.
                let text = if out.stdout.trim().is_empty() {
                    &out.stderr
                } else {
                    &out.stdout
                };
                BackendStatus {
                    available: true,
                    version: text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string),
                    binary: Some(self.program.clone()),
                    error: None,
                }
            }
            Ok(out) => BackendStatus {
                available: false,
                binary: Some(self.program.clone()),
                error: Some(out.diagnostic()),
                ..Default::default()
            },
            Err(e) => BackendStatus {
                available: false,
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }
}

/// The JSON report on the last non-empty stdout line, if there is one.
pub fn parse_report(stdout: &str) -> Option<ConverterReport> {
    let line = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty())?;
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_taken_from_last_line() {
        let out = "progress 10%\nprogress 100%\n{\"success\": true, \"message\": \"ok\"}\n\n";
        let report = parse_report(out).unwrap();
        assert!(report.success);
        assert_eq!(report.message.as_deref(), Some("ok"));
    }

    #[test]
    fn failure_report_carries_error() {
        let report = parse_report(r#"{"success": false, "error": "Encrypted PDF"}"#).unwrap();
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Encrypted PDF"));
    }

    #[test]
    fn missing_or_garbled_report_is_none() {
        assert_eq!(parse_report(""), None);
        assert_eq!(parse_report("done\n"), None);
        assert_eq!(parse_report("{\"success\": true}\ntrailing noise"), None);
    }

    #[test]
    fn always_writes_docx() {
        let b = PdfToWordBackend::new("python3", ["pdf2word.py"]);
        assert_eq!(b.output_format(DocumentFormat::Odt), DocumentFormat::Docx);
        assert_eq!(b.output_format(DocumentFormat::Doc), DocumentFormat::Docx);
        assert_eq!(b.name(), "pdf-to-word");
    }
}
