//! Configuration for the conversion orchestrator.
//!
//! All orchestrator behaviour is controlled through [`OrchestratorConfig`],
//! built via its [`OrchestratorConfigBuilder`] or loaded from a JSON file.
//! Every field has a default, so a config file only needs the keys it wants
//! to change:
//!
//! ```json
//! { "scratch_dir": "/var/tmp/docconv", "office_timeout_ms": 90000 }
//! ```

use crate::context::SharedObserver;
use crate::error::ConvertError;
use crate::registry::{BackendId, OFFICE_SUITE, PDF_TO_WORD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for every configured duration (24 h).
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Configuration shared by every request an orchestrator serves.
///
/// # Example
/// ```rust
/// use docconv::OrchestratorConfig;
///
/// let config = OrchestratorConfig::builder()
///     .scratch_dir("/tmp/docconv-test")
///     .office_timeout_ms(90_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding staged inputs, backend outputs and office profiles.
    /// Default: `<system temp>/docconv`.
    ///
    /// Shared by all requests. Every entry a request creates, including its
    /// `<rid>-out` and `<rid>-profile` directories, carries the request-id
    /// prefix, so concurrent requests never collide.
    pub scratch_dir: PathBuf,

    /// Office-suite executables, tried in order until one can be spawned.
    /// Default: `["soffice", "libreoffice"]`.
    pub office_binaries: Vec<String>,

    /// Program that runs the structured PDF-to-Word converter. Default: `python3`.
    pub pdf_to_word_program: String,

    /// Arguments placed before `<input> <output>`. Default: `["pdf2word.py"]`.
    pub pdf_to_word_args: Vec<String>,

    /// Office-suite conversion timeout. Default: 60 000 ms.
    pub office_timeout_ms: u64,

    /// PDF-to-Word conversion timeout. Default: 120 000 ms.
    ///
    /// Layout reconstruction is slower than a re-render; large PDFs
    /// routinely need more than a minute.
    pub pdf_to_word_timeout_ms: u64,

    /// Timeout for health-check version probes. Default: 10 000 ms.
    pub probe_timeout_ms: u64,

    /// Largest accepted input. Default: 50 MiB.
    pub max_input_bytes: u64,

    /// Upper bound on scratch entries inspected when the office backend's
    /// output is not at its expected path. Default: 512.
    pub max_scan_entries: usize,

    /// Age after which the startup sweep removes request-prefixed scratch
    /// entries. Default: twice the longest backend timeout.
    pub stale_after_ms: Option<u64>,

    /// Lifecycle observer. Not serialised.
    #[serde(skip)]
    pub observer: Option<SharedObserver>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("docconv"),
            office_binaries: vec!["soffice".into(), "libreoffice".into()],
            pdf_to_word_program: "python3".into(),
            pdf_to_word_args: vec!["pdf2word.py".into()],
            office_timeout_ms: OFFICE_SUITE.default_timeout.as_millis() as u64,
            pdf_to_word_timeout_ms: PDF_TO_WORD.default_timeout.as_millis() as u64,
            probe_timeout_ms: 10_000,
            max_input_bytes: 50 * 1024 * 1024,
            max_scan_entries: 512,
            stale_after_ms: None,
            observer: None,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("scratch_dir", &self.scratch_dir)
            .field("office_binaries", &self.office_binaries)
            .field("pdf_to_word_program", &self.pdf_to_word_program)
            .field("pdf_to_word_args", &self.pdf_to_word_args)
            .field("office_timeout_ms", &self.office_timeout_ms)
            .field("pdf_to_word_timeout_ms", &self.pdf_to_word_timeout_ms)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("max_scan_entries", &self.max_scan_entries)
            .field("stale_after_ms", &self.stale_after_ms)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn ConversionObserver>"))
            .finish()
    }
}

impl OrchestratorConfig {
    /// Create a new builder for `OrchestratorConfig`.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load a config from a JSON file; missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConvertError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ConvertError::InvalidConfig(format!("cannot parse '{}': {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Time budget for a conversion on the given backend.
    pub fn timeout_for(&self, backend: BackendId) -> Duration {
        match backend {
            BackendId::OfficeSuite => Duration::from_millis(self.office_timeout_ms),
            BackendId::PdfToWord => Duration::from_millis(self.pdf_to_word_timeout_ms),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Resolved stale-entry age for the startup sweep.
    pub fn stale_after(&self) -> Duration {
        let ms = self
            .stale_after_ms
            .unwrap_or_else(|| {
                self.office_timeout_ms
                    .max(self.pdf_to_word_timeout_ms)
                    .saturating_mul(2)
            });
        Duration::from_millis(ms)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.office_binaries.iter().all(|b| b.trim().is_empty()) {
            return Err(ConvertError::InvalidConfig(
                "office_binaries must name at least one executable".into(),
            ));
        }
        if self.pdf_to_word_program.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "pdf_to_word_program must not be empty".into(),
            ));
        }
        if self.office_timeout_ms == 0 || self.pdf_to_word_timeout_ms == 0 {
            return Err(ConvertError::InvalidConfig(
                "conversion timeouts must be > 0".into(),
            ));
        }
        let durations = [
            ("office_timeout_ms", Some(self.office_timeout_ms)),
            ("pdf_to_word_timeout_ms", Some(self.pdf_to_word_timeout_ms)),
            ("probe_timeout_ms", Some(self.probe_timeout_ms)),
            ("stale_after_ms", self.stale_after_ms),
        ];
        for (name, ms) in durations {
            if ms.is_some_and(|ms| ms > MAX_DURATION_MS) {
                return Err(ConvertError::InvalidConfig(format!(
                    "{name} must be at most {MAX_DURATION_MS} ms"
                )));
            }
        }
        if self.max_input_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_input_bytes must be > 0".into(),
            ));
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "scratch_dir must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn office_binaries<I, S>(mut self, binaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.office_binaries = binaries.into_iter().map(Into::into).collect();
        self
    }

    pub fn office_binary(mut self, binary: impl Into<String>) -> Self {
        self.config.office_binaries = vec![binary.into()];
        self
    }

    pub fn pdf_to_word_command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.pdf_to_word_program = program.into();
        self.config.pdf_to_word_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn office_timeout_ms(mut self, ms: u64) -> Self {
        self.config.office_timeout_ms = ms.max(1);
        self
    }

    pub fn pdf_to_word_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pdf_to_word_timeout_ms = ms.max(1);
        self
    }

    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.probe_timeout_ms = ms.max(1);
        self
    }

    pub fn max_input_bytes(mut self, bytes: u64) -> Self {
        self.config.max_input_bytes = bytes;
        self
    }

    pub fn max_scan_entries(mut self, n: usize) -> Self {
        self.config.max_scan_entries = n.max(1);
        self
    }

    pub fn stale_after_ms(mut self, ms: u64) -> Self {
        self.config.stale_after_ms = Some(ms);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, ConvertError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_backend_descriptors() {
        let c = OrchestratorConfig::default();
        assert_eq!(c.timeout_for(BackendId::OfficeSuite), Duration::from_secs(60));
        assert_eq!(c.timeout_for(BackendId::PdfToWord), Duration::from_secs(120));
        assert_eq!(c.stale_after(), Duration::from_secs(240));
        assert_eq!(c.max_input_bytes, 50 * 1024 * 1024);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = OrchestratorConfig::builder()
            .office_timeout_ms(0)
            .max_scan_entries(0)
            .build()
            .unwrap();
        assert_eq!(c.office_timeout_ms, 1);
        assert_eq!(c.max_scan_entries, 1);

        let err = OrchestratorConfig::builder()
            .office_binaries(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(_)));

        let err = OrchestratorConfig::builder().max_input_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("max_input_bytes"));
    }

    #[test]
    fn json_file_fills_missing_keys_with_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{ "office_timeout_ms": 90000, "office_binaries": ["/opt/office/soffice"] }}"#
        )
        .unwrap();

        let c = OrchestratorConfig::from_json_file(f.path()).unwrap();
        assert_eq!(c.office_timeout_ms, 90_000);
        assert_eq!(c.office_binaries, vec!["/opt/office/soffice".to_string()]);
        assert_eq!(c.pdf_to_word_timeout_ms, 120_000);
        assert_eq!(c.stale_after(), Duration::from_secs(240));
    }

    #[test]
    fn json_file_rejects_garbage() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        let err = OrchestratorConfig::from_json_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("cannot parse"));
    }

    #[test]
    fn json_file_rejects_out_of_range_timeouts() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{ "pdf_to_word_timeout_ms": 18446744073709551615 }}"#).unwrap();
        let err = OrchestratorConfig::from_json_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("pdf_to_word_timeout_ms"));

        let err = OrchestratorConfig::builder()
            .stale_after_ms(MAX_DURATION_MS + 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidConfig(_)));
    }

    #[test]
    fn stale_after_saturates_on_huge_timeouts() {
        let c = OrchestratorConfig {
            pdf_to_word_timeout_ms: u64::MAX,
            ..OrchestratorConfig::default()
        };
        assert_eq!(c.stale_after(), Duration::from_millis(u64::MAX));
        assert!(c.validate().is_err());
    }

    #[test]
    fn explicit_stale_after_wins() {
        let c = OrchestratorConfig::builder().stale_after_ms(5_000).build().unwrap();
        assert_eq!(c.stale_after(), Duration::from_secs(5));
    }
}
