//! # docconv
//!
//! Convert office documents and PDFs between formats by orchestrating
//! external converters: a headless office suite for general conversions and
//! a structured PDF-to-Word tool for `pdf → docx | doc | odt`.
//!
//! ## Why two backends?
//!
//! An office suite opens a PDF as a drawing: every line becomes a positioned
//! text frame, so the resulting DOCX is uneditable. The structured converter
//! rebuilds paragraphs and tables instead. The capability registry sends the
//! PDF-to-Word family to it and everything else to the office suite.
//!
//! ## Request Lifecycle
//!
//! ```text
//! bytes + name + target
//!  │
//!  ├─ 1. Received    validate size, take source format from the name
//!  ├─ 2. Routed      registry picks exactly one backend
//!  ├─ 3. Staged      input written as <request-id>-<nanos>-<base>.<ext>
//!  ├─ 4. Converting  backend subprocess, killed on timeout
//!  ├─ 5. Resolved    output located and confirmed non-empty
//!  └─ 6. Completed   bytes returned; workspace always released
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconv::{Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(OrchestratorConfig::default())?;
//!     orchestrator.sweep_stale().await?;
//!
//!     let bytes = std::fs::read("slide.pptx")?;
//!     let output = orchestrator.convert(&bytes, "slide.pptx", "pdf").await?;
//!     std::fs::write(&output.file_name, &output.bytes)?;
//!     eprintln!("{} via {} in {}ms",
//!         output.file_name, output.backend, output.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docconv = { version = "0.1", default-features = false }
//! ```
//!
//! ## External Tools
//!
//! | Backend | Default command | Handles |
//! |---------|-----------------|---------|
//! | office-suite | `soffice`, then `libreoffice` | everything except the row below |
//! | pdf-to-word  | `python3 pdf2word.py <in> <out>` | `pdf → docx, doc, odt` (always writes DOCX) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod health;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendJob, BackendStatus, ConversionBackend, OfficeSuiteBackend, PdfToWordBackend};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use context::{ConversionObserver, NoopObserver, RequestContext, SharedObserver};
pub use error::{ConversionFailure, ConvertError, Stage};
pub use format::DocumentFormat;
pub use health::{HealthReport, HealthStatus};
pub use orchestrator::{convert_sync, Orchestrator};
pub use output::{Base64Output, ConversionOutput, ConversionStats};
pub use registry::{BackendDescriptor, BackendId};
pub use workspace::{SweepReport, Workspace, WorkspaceManager};
