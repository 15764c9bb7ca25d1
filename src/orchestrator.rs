//! Request-level conversion entry points.
//!
//! Each request walks one state machine:
//!
//! ```text
//! Received ─▶ Routed ─▶ Staged ─▶ Converting ─▶ Resolved ─▶ Completed
//!    │          │         │           │             │
//!    └──────────┴─────────┴───────────┴─────────────┴──▶ Failed(stage)
//! ```
//!
//! * `Received`: input validated, source format taken from the file name.
//! * `Routed`: the registry picked exactly one backend. A routing failure
//!   never spawns anything.
//! * `Staged`: input bytes written under a request-qualified name.
//! * `Converting`: the only state with a live subprocess.
//! * `Resolved`: the output path is confirmed to hold a non-empty file.
//! * `Completed`: bytes read into memory.
//!
//! The workspace is released exactly once whichever way the request ends,
//! before the result is returned. Nothing is retried.

use crate::backend::{BackendJob, ConversionBackend, OfficeSuiteBackend, PdfToWordBackend};
use crate::config::OrchestratorConfig;
use crate::context::RequestContext;
use crate::error::{ConversionFailure, ConvertError, Stage};
use crate::format::DocumentFormat;
use crate::health::{self, HealthReport};
use crate::output::{Base64Output, ConversionOutput, ConversionStats};
use crate::registry::{self, BackendId};
use crate::workspace::{SweepReport, Workspace, WorkspaceManager};
use base64::Engine as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Coordinates registry, workspace and backends for every request.
///
/// Cheap to clone; clones share the backend adapters. Holds no per-request
/// state, so one instance serves any number of concurrent conversions.
#[derive(Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    workspaces: WorkspaceManager,
    office: Arc<dyn ConversionBackend>,
    pdf_to_word: Arc<dyn ConversionBackend>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("office", &self.office.name())
            .field("pdf_to_word", &self.pdf_to_word.name())
            .finish()
    }
}

impl Orchestrator {
    /// Build an orchestrator with the subprocess backends described by `config`.
    pub fn new(config: OrchestratorConfig) -> Result<Self, ConvertError> {
        let office = Arc::new(OfficeSuiteBackend::from_config(&config));
        let pdf_to_word = Arc::new(PdfToWordBackend::from_config(&config));
        Self::with_backends(config, office, pdf_to_word)
    }

    /// Build an orchestrator around caller-supplied backends.
    pub fn with_backends(
        config: OrchestratorConfig,
        office: Arc<dyn ConversionBackend>,
        pdf_to_word: Arc<dyn ConversionBackend>,
    ) -> Result<Self, ConvertError> {
        config.validate()?;
        Ok(Self {
            workspaces: WorkspaceManager::new(&config.scratch_dir),
            config,
            office,
            pdf_to_word,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    fn backend(&self, id: BackendId) -> &dyn ConversionBackend {
        match id {
            BackendId::OfficeSuite => self.office.as_ref(),
            BackendId::PdfToWord => self.pdf_to_word.as_ref(),
        }
    }

    /// Convert `bytes` (named `original_name` by the uploader) to `target`.
    ///
    /// # Arguments
    /// * `bytes`: the uploaded document
    /// * `original_name`: uploader's file name; its extension picks the
    ///   source format and its stem names the result
    /// * `target`: target extension (`"pdf"`, `"docx"`, ...), case-insensitive
    ///
    /// # Errors
    /// A [`ConversionFailure`] carrying the stage reached and the backend
    /// selected. The workspace has already been released when it is returned.
    pub async fn convert(
        &self,
        bytes: &[u8],
        original_name: &str,
        target: &str,
    ) -> Result<ConversionOutput, ConversionFailure> {
        let ctx = RequestContext::new(self.config.observer.clone());
        let span = info_span!("convert", request_id = %ctx.request_id());
        self.run(&ctx, bytes, original_name, target)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        bytes: &[u8],
        original_name: &str,
        target: &str,
    ) -> Result<ConversionOutput, ConversionFailure> {
        let observer = ctx.observer();
        let request_id = ctx.request_id();
        info!(file = original_name, target, bytes = bytes.len(), "Conversion requested");
        observer.on_request_start(request_id, original_name, target);

        let source = DocumentFormat::from_file_name(&base_file_name(original_name)).ok();
        let mut workspace = self.workspaces.acquire(ctx, original_name, source);
        let result = self
            .drive(ctx, &mut workspace, bytes, original_name, target)
            .await;
        workspace.release().await;

        match &result {
            Ok(output) => {
                info!(
                    backend = %output.backend,
                    file = %output.file_name,
                    output_bytes = output.stats.output_bytes,
                    duration_ms = output.stats.total_duration_ms,
                    "Conversion complete"
                );
                observer.on_request_complete(request_id, output);
            }
            Err(failure) => {
                warn!(
                    stage = %failure.stage,
                    backend = failure.backend.as_deref().unwrap_or("-"),
                    kind = failure.error.kind(),
                    "{}",
                    failure.error
                );
                observer.on_request_failed(request_id, failure);
            }
        }
        result
    }

    /// Everything between acquire and release.
    async fn drive(
        &self,
        ctx: &RequestContext,
        workspace: &mut Workspace,
        bytes: &[u8],
        original_name: &str,
        target: &str,
    ) -> Result<ConversionOutput, ConversionFailure> {
        let enter = |stage: Stage| {
            debug!(%stage, "State transition");
            ctx.observer().on_stage(ctx.request_id(), stage);
        };

        // ── Received ─────────────────────────────────────────────────────
        enter(Stage::Received);
        self.validate_input(bytes)
            .map_err(|e| ConversionFailure::new(Stage::Received, None, e))?;

        let source_ext = extension_of(original_name);
        let descriptor = registry::resolve(&source_ext, target)
            .map_err(|e| ConversionFailure::new(Stage::Received, None, e))?;
        let source: DocumentFormat = source_ext
            .parse()
            .map_err(|e| ConversionFailure::new(Stage::Received, None, e))?;
        let target: DocumentFormat = target
            .parse()
            .map_err(|e| ConversionFailure::new(Stage::Received, None, e))?;

        // ── Routed ───────────────────────────────────────────────────────
        let backend = self.backend(descriptor.id);
        let name = backend.name();
        let fail = |stage: Stage| move |e: ConvertError| ConversionFailure::new(stage, Some(name), e);
        enter(Stage::Routed);
        debug!(%source, %target, backend = name, "Routed");

        workspace.stage(bytes).await.map_err(fail(Stage::Routed))?;

        // ── Staged ───────────────────────────────────────────────────────
        enter(Stage::Staged);
        let output_format = backend.output_format(target);
        let output_path = workspace.output_path_for(output_format);
        let job = BackendJob {
            input: workspace.input_path(),
            source,
            target,
            output_dir: workspace.output_dir(),
            output_path: &output_path,
            profile_dir: workspace.profile_dir(),
            timeout: self.config.timeout_for(descriptor.id),
        };

        // ── Converting ───────────────────────────────────────────────────
        enter(Stage::Converting);
        let backend_started = Instant::now();
        let produced = backend
            .convert(&job, ctx)
            .await
            .map_err(fail(Stage::Converting))?;
        let backend_duration_ms = backend_started.elapsed().as_millis() as u64;

        // ── Resolved ─────────────────────────────────────────────────────
        enter(Stage::Resolved);
        if produced != output_path {
            workspace.track(produced.clone());
        }
        let output = tokio::fs::read(&produced).await.map_err(|source| {
            fail(Stage::Resolved)(ConvertError::OutputReadFailed {
                path: produced.clone(),
                source,
            })
        })?;
        if output.is_empty() {
            return Err(fail(Stage::Resolved)(ConvertError::EmptyOutput {
                backend: name.to_string(),
                path: produced,
            }));
        }
        if !output_format.matches_signature(&output) {
            warn!(
                backend = name,
                format = %output_format,
                "Output does not start with the expected {} signature",
                output_format
            );
        }

        // ── Completed ────────────────────────────────────────────────────
        enter(Stage::Completed);
        Ok(ConversionOutput {
            file_name: result_file_name(original_name, output_format),
            format: output_format,
            mime_type: output_format.mime_type(),
            backend: name.to_string(),
            request_id: ctx.request_id().to_string(),
            stats: ConversionStats {
                input_bytes: bytes.len() as u64,
                output_bytes: output.len() as u64,
                backend_duration_ms,
                total_duration_ms: ctx.elapsed_ms(),
            },
            bytes: output,
        })
    }

    fn validate_input(&self, bytes: &[u8]) -> Result<(), ConvertError> {
        if bytes.is_empty() {
            return Err(ConvertError::InvalidInput("input is empty".into()));
        }
        if bytes.len() as u64 > self.config.max_input_bytes {
            return Err(ConvertError::InvalidInput(format!(
                "input is {} bytes; the limit is {} bytes",
                bytes.len(),
                self.config.max_input_bytes
            )));
        }
        Ok(())
    }

    /// Convert a file on disk and write the result into `output_dir`.
    ///
    /// The result is written atomically (temp file + rename) so readers never
    /// see a partial file. Returns the path written.
    pub async fn convert_file(
        &self,
        input: impl AsRef<Path>,
        target: &str,
        output_dir: impl AsRef<Path>,
    ) -> Result<PathBuf, ConversionFailure> {
        let input = input.as_ref();
        let output_dir = output_dir.as_ref();

        let bytes = tokio::fs::read(input).await.map_err(|e| {
            ConversionFailure::new(
                Stage::Received,
                None,
                ConvertError::InvalidInput(format!("cannot read '{}': {e}", input.display())),
            )
        })?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let output = self.convert(&bytes, &name, target).await?;
        let backend = output.backend.clone();
        let write_err = |path: &Path| {
            let path = path.to_path_buf();
            let backend = backend.clone();
            move |source: std::io::Error| {
                ConversionFailure::new(
                    Stage::Completed,
                    Some(&backend),
                    ConvertError::OutputWriteFailed { path, source },
                )
            }
        };

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(write_err(output_dir))?;

        // Atomic write: temp file in the destination directory, then rename.
        // The temp file is deleted on drop if any step fails.
        let path = output_dir.join(&output.file_name);
        let len = output.bytes.len();
        let (dir, dest) = (output_dir.to_path_buf(), path.clone());
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(".docconv-")
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            std::io::Write::write_all(&mut tmp, &output.bytes)?;
            tmp.persist(&dest).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| {
            ConversionFailure::new(
                Stage::Completed,
                Some(&backend),
                ConvertError::Internal(format!("Write task panicked: {e}")),
            )
        })?
        .map_err(write_err(&path))?;

        info!("Wrote {} ({} bytes)", path.display(), len);
        Ok(path)
    }

    /// Convert a base64 payload and return the result base64-encoded.
    ///
    /// A `data:<mime>;base64,` prefix and embedded whitespace are tolerated.
    pub async fn convert_base64(
        &self,
        data: &str,
        file_name: &str,
        target: &str,
    ) -> Result<Base64Output, ConversionFailure> {
        let bytes = decode_base64(data)
            .map_err(|e| ConversionFailure::new(Stage::Received, None, e))?;
        let output = self.convert(&bytes, file_name, target).await?;
        Ok(Base64Output {
            success: true,
            data: base64::engine::general_purpose::STANDARD.encode(&output.bytes),
            file_name: output.file_name,
            format: output.format,
            mime_type: output.mime_type,
            original_size: output.stats.input_bytes,
            converted_size: output.stats.output_bytes,
        })
    }

    /// Probe both backends without converting anything.
    pub async fn check_backends(&self) -> HealthReport {
        health::check_backends(
            &[self.pdf_to_word.as_ref(), self.office.as_ref()],
            self.config.probe_timeout(),
        )
        .await
    }

    /// Remove stale request-prefixed scratch entries left by a crash.
    ///
    /// Run once at startup, before serving requests.
    pub async fn sweep_stale(&self) -> Result<SweepReport, ConvertError> {
        self.workspaces.sweep_stale(self.config.stale_after()).await
    }
}

/// Blocking convenience wrapper around [`Orchestrator::convert`].
///
/// Creates a Tokio runtime internally; do not call from inside one.
pub fn convert_sync(
    config: OrchestratorConfig,
    bytes: &[u8],
    original_name: &str,
    target: &str,
) -> Result<ConversionOutput, ConversionFailure> {
    let failure = |e: ConvertError| ConversionFailure::new(Stage::Received, None, e);
    let orchestrator = Orchestrator::new(config).map_err(failure)?;
    tokio::runtime::Runtime::new()
        .map_err(|e| failure(ConvertError::Internal(format!("Failed to create runtime: {e}"))))?
        .block_on(orchestrator.convert(bytes, original_name, target))
}

/// Last path component, with either separator.
fn base_file_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

/// Lowercase extension of the uploader's file name, or `""`.
fn extension_of(name: &str) -> String {
    Path::new(&base_file_name(name))
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// `<original stem>.<ext>`, falling back to `document` for a blank stem.
pub fn result_file_name(original_name: &str, format: DocumentFormat) -> String {
    let base = base_file_name(original_name);
    let stem = Path::new(&base)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}.{}", format.extension())
}

fn decode_base64(data: &str) -> Result<Vec<u8>, ConvertError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(ConvertError::InvalidBase64("payload is empty".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| ConvertError::InvalidBase64(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_names_keep_original_stem() {
        assert_eq!(result_file_name("report.pdf", DocumentFormat::Docx), "report.docx");
        assert_eq!(result_file_name("dir/slide.PPTX", DocumentFormat::Pdf), "slide.pdf");
        assert_eq!(result_file_name("C:\\x\\My File.docx", DocumentFormat::Pdf), "My File.pdf");
        assert_eq!(result_file_name("", DocumentFormat::Pdf), "document.pdf");
    }

    #[test]
    fn extension_ignores_directories() {
        assert_eq!(extension_of("a.b/report.PDF"), "pdf");
        assert_eq!(extension_of("dir.pdf/noext"), "");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
    }

    #[test]
    fn base64_accepts_data_urls_and_whitespace() {
        assert_eq!(decode_base64("aGVs\nbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64("data:application/pdf;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(matches!(
            decode_base64("!!not base64!!").unwrap_err(),
            ConvertError::InvalidBase64(_)
        ));
        assert!(decode_base64("  ").is_err());
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = OrchestratorConfig::default();
        config.max_input_bytes = 0;
        assert!(matches!(
            Orchestrator::new(config).unwrap_err(),
            ConvertError::InvalidConfig(_)
        ));
    }
}
