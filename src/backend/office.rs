//! Office-suite adapter (LibreOffice `--convert-to`).
//!
//! The office suite decides its own output name (`<input stem>.<ext>` in the
//! output directory), so after the process exits the adapter has to find
//! what it wrote:
//!
//! 1. the expected path, if it exists;
//! 2. otherwise the newest file in the output directory whose name starts
//!    with the input stem, excluding the input itself, looking at no more
//!    than `max_scan_entries` entries;
//! 3. otherwise `NotProduced`, with a listing of what was there.
//!
//! Whatever is found must also be non-empty.

use super::process::{self, ProcessOutput};
use super::{verify_output, BackendJob, BackendStatus, ConversionBackend};
use crate::config::OrchestratorConfig;
use crate::context::RequestContext;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use crate::registry::BackendId;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Import filter that makes the office suite open a PDF as an editable
/// text document instead of a drawing.
const PDF_IMPORT_FILTER: &str = "writer_pdf_import";

/// LibreOffice (or compatible) headless converter.
#[derive(Debug, Clone)]
pub struct OfficeSuiteBackend {
    binaries: Vec<String>,
    max_scan_entries: usize,
}

impl OfficeSuiteBackend {
    /// `binaries` are tried in order; the next one is used only when the
    /// previous one cannot be started at all.
    pub fn new<I, S>(binaries: I, max_scan_entries: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            binaries: binaries
                .into_iter()
                .map(Into::into)
                .filter(|b: &String| !b.trim().is_empty())
                .collect(),
            max_scan_entries: max_scan_entries.max(1),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.office_binaries.clone(), config.max_scan_entries)
    }

    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    fn command(&self, binary: &str, job: &BackendJob<'_>) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(office_args(job))
            .env("HOME", job.profile_dir)
            .env("SAL_USE_VCLPLUGIN", "svp");
        cmd
    }

    /// Locate the file the office suite wrote for `job`.
    async fn resolve_output(&self, job: &BackendJob<'_>) -> Result<PathBuf, ConvertError> {
        let backend = self.name();
        let expected = expected_output(job);
        if tokio::fs::metadata(&expected).await.is_ok_and(|m| m.is_file()) {
            verify_output(backend, &expected).await?;
            return Ok(expected);
        }

        let stem = file_stem(job.input);
        match newest_with_prefix(job.output_dir, &stem, job.input, self.max_scan_entries).await {
            Some(found) => {
                info!(
                    backend,
                    expected = %expected.display(),
                    found = %found.display(),
                    "Output not at expected path; using newest stem match"
                );
                verify_output(backend, &found).await?;
                Ok(found)
            }
            // Reports NotProduced with a listing of the directory.
            None => verify_output(backend, &expected).await.map(|_| expected),
        }
    }
}

#[async_trait]
impl ConversionBackend for OfficeSuiteBackend {
    fn id(&self) -> BackendId {
        BackendId::OfficeSuite
    }

    async fn convert(
        &self,
        job: &BackendJob<'_>,
        ctx: &RequestContext,
    ) -> Result<PathBuf, ConvertError> {
        let backend = self.name();
        let mut failures = Vec::new();

        for binary in &self.binaries {
            ctx.observer()
                .on_backend_spawn(ctx.request_id(), backend, binary);
            let output = match process::run(self.command(binary, job), backend, job.timeout).await {
                Ok(output) => output,
                Err(ConvertError::BackendUnavailable { detail, .. }) => {
                    debug!(backend, binary = %binary, "{detail}; trying next executable");
                    failures.push(detail);
                    continue;
                }
                Err(e) => return Err(e),
            };
            check_exit(backend, &output)?;
            return self.resolve_output(job).await;
        }

        Err(ConvertError::BackendUnavailable {
            backend: backend.to_string(),
            detail: if failures.is_empty() {
                "no office executable configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }

    async fn probe(&self, timeout: Duration) -> BackendStatus {
        let mut errors = Vec::new();
        for binary in &self.binaries {
            let mut cmd = Command::new(binary);
            cmd.arg("--version").env("SAL_USE_VCLPLUGIN", "svp");
            match process::run(cmd, self.name(), timeout).await {
                Ok(out) if out.status.success() => {
                    return BackendStatus {
                        available: true,
                        version: first_line(&out.stdout),
                        binary: Some(binary.clone()),
                        error: None,
                    };
                }
                Ok(out) => errors.push(format!("{binary}: {}", out.diagnostic())),
                Err(e) => errors.push(e.to_string()),
            }
        }
        warn!(backend = self.name(), "Office suite probe failed");
        BackendStatus {
            available: false,
            version: None,
            binary: None,
            error: Some(errors.join("; ")),
        }
    }
}

/// Argument vector for one conversion. Paths are passed through as
/// `OsString`s, never re-encoded.
fn office_args(job: &BackendJob<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--headless",
        "--invisible",
        "--norestore",
        "--nolockcheck",
        "--nodefault",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(format!("-env:UserInstallation={}", file_url(job.profile_dir)).into());
    if job.source == DocumentFormat::Pdf && job.target.is_text_document() {
        args.push(format!("--infilter={PDF_IMPORT_FILTER}").into());
    }
    args.push("--convert-to".into());
    args.push(job.target.extension().into());
    args.push("--outdir".into());
    args.push(job.output_dir.into());
    args.push(job.input.into());
    args
}

fn check_exit(backend: &str, output: &ProcessOutput) -> Result<(), ConvertError> {
    if output.status.success() {
        return Ok(());
    }
    Err(ConvertError::ConversionProcessError {
        backend: backend.to_string(),
        exit_code: output.status.code(),
        diagnostic: output.diagnostic(),
    })
}

fn expected_output(job: &BackendJob<'_>) -> PathBuf {
    job.output_dir
        .join(format!("{}.{}", file_stem(job.input), job.target.extension()))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Newest regular file in `dir` named `<stem>…`, other than `exclude`.
async fn newest_with_prefix(
    dir: &Path,
    stem: &str,
    exclude: &Path,
    limit: usize,
) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let stem = stem.to_lowercase();
    let exclude_name = exclude.file_name();
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut seen = 0;

    while seen < limit {
        let Ok(Some(entry)) = entries.next_entry().await else {
            break;
        };
        seen += 1;
        let name = entry.file_name();
        if Some(name.as_os_str()) == exclude_name
            || !name.to_string_lossy().to_lowercase().starts_with(&stem)
        {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, path)| path)
}

/// `file://` URL for a directory, as the office suite expects for profiles.
fn file_url(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match Url::from_file_path(&abs) {
        Ok(url) => url.into(),
        Err(()) => format!("file://{}", abs.to_string_lossy().replace('\\', "/")),
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job<'a>(
        input: &'a Path,
        out: &'a Path,
        source: DocumentFormat,
        target: DocumentFormat,
    ) -> BackendJob<'a> {
        BackendJob {
            input,
            source,
            target,
            output_dir: out,
            output_path: out,
            profile_dir: out,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn args_are_a_plain_vector() {
        let input = Path::new("/scratch/abc-1-my file.docx");
        let out = Path::new("/scratch/abc-out");
        let args = office_args(&job(input, out, DocumentFormat::Docx, DocumentFormat::Pdf));

        assert!(args.contains(&OsString::from("--headless")));
        assert!(!has_infilter(&args));
        let n = args.len();
        assert_eq!(&args[n - 5..], &[
            OsString::from("--convert-to"),
            OsString::from("pdf"),
            OsString::from("--outdir"),
            OsString::from("/scratch/abc-out"),
            OsString::from("/scratch/abc-1-my file.docx"),
        ]);
    }

    #[test]
    fn pdf_to_text_document_uses_import_filter() {
        let input = Path::new("/s/a.pdf");
        let out = Path::new("/s/out");
        for target in [DocumentFormat::Docx, DocumentFormat::Doc, DocumentFormat::Rtf, DocumentFormat::Odt] {
            let args = office_args(&job(input, out, DocumentFormat::Pdf, target));
            assert!(args.contains(&OsString::from("--infilter=writer_pdf_import")), "{target}");
        }

        for target in [DocumentFormat::Pdf, DocumentFormat::Xlsx, DocumentFormat::Pptx] {
            let args = office_args(&job(input, out, DocumentFormat::Pdf, target));
            assert!(!has_infilter(&args), "{target}");
        }
    }

    fn has_infilter(args: &[OsString]) -> bool {
        args.iter().any(|a| a.to_string_lossy().starts_with("--infilter"))
    }

    #[cfg(unix)]
    #[test]
    fn profile_is_a_file_url() {
        assert_eq!(file_url(Path::new("/tmp/a b")), "file:///tmp/a%20b");
        assert_eq!(
            file_url(Path::new("/tmp/50%#1/é")),
            "file:///tmp/50%25%231/%C3%A9"
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_pass_through_unchanged() {
        use std::os::unix::ffi::OsStrExt;

        let raw = std::ffi::OsStr::from_bytes(b"/scratch/\xffbad");
        let input = Path::new(raw).join("in.docx");
        let out = Path::new(raw).join("out");
        let args = office_args(&job(&input, &out, DocumentFormat::Docx, DocumentFormat::Pdf));
        let n = args.len();
        assert_eq!(args[n - 2].as_os_str(), out.as_os_str());
        assert_eq!(args[n - 1].as_os_str(), input.as_os_str());
    }

    #[test]
    fn binaries_skip_blanks() {
        let b = OfficeSuiteBackend::new(["", "soffice", "  "], 0);
        assert_eq!(b.binaries(), &["soffice".to_string()]);
        assert_eq!(b.max_scan_entries, 1);
    }

    #[tokio::test]
    async fn resolves_expected_then_newest_stem_match() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rid-1-report.docx");
        std::fs::write(&input, b"source").unwrap();
        let backend = OfficeSuiteBackend::new(["soffice"], 16);
        let j = job(&input, dir.path(), DocumentFormat::Docx, DocumentFormat::Pdf);

        // Only the input matches the stem: nothing produced.
        let err = backend.resolve_output(&j).await.unwrap_err();
        assert!(matches!(err, ConvertError::NotProduced { .. }), "got {err:?}");

        // Backend picked a different extension casing.
        let odd = dir.path().join("rid-1-report.PDF");
        std::fs::write(&odd, b"%PDF").unwrap();
        let found = backend.resolve_output(&j).await.unwrap();
        assert_eq!(found.file_name(), odd.file_name());

        let expected = dir.path().join("rid-1-report.pdf");
        std::fs::write(&expected, b"%PDF").unwrap();
        assert_eq!(backend.resolve_output(&j).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn empty_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.docx");
        std::fs::write(&input, b"source").unwrap();
        std::fs::write(dir.path().join("x.pdf"), b"").unwrap();
        let backend = OfficeSuiteBackend::new(["soffice"], 16);
        let j = job(&input, dir.path(), DocumentFormat::Docx, DocumentFormat::Pdf);
        assert!(matches!(
            backend.resolve_output(&j).await.unwrap_err(),
            ConvertError::EmptyOutput { .. }
        ));
    }

    #[tokio::test]
    async fn unavailable_when_no_binary_starts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("x.docx");
        let backend = OfficeSuiteBackend::new(
            ["/nonexistent/docconv-soffice", "/nonexistent/docconv-libreoffice"],
            16,
        );
        let j = job(&input, dir.path(), DocumentFormat::Docx, DocumentFormat::Pdf);
        let err = backend
            .convert(&j, &RequestContext::new(None))
            .await
            .unwrap_err();
        match err {
            ConvertError::BackendUnavailable { detail, .. } => {
                assert!(detail.contains("docconv-soffice"));
                assert!(detail.contains("docconv-libreoffice"));
            }
            e => panic!("unexpected {e:?}"),
        }
    }
}
