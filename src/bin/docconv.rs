//! CLI binary for docconv.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `OrchestratorConfig`, converts each input and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use docconv::{
    ConversionFailure, ConversionObserver, ConversionOutput, HealthStatus, Orchestrator,
    OrchestratorConfig, SharedObserver,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Renders one progress bar across all inputs plus a log line per finished
/// request. Requests finish out of order, so per-request state is keyed by
/// request id.
struct CliProgressObserver {
    bar: ProgressBar,
    /// request id → (file name, start time)
    running: Mutex<HashMap<String, (String, Instant)>>,
}

impl CliProgressObserver {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            running: Mutex::new(HashMap::new()),
        })
    }

    fn finish(&self, total: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} files converted successfully",
                green("✔"),
                bold(&total.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }

    fn take(&self, request_id: &str) -> (String, u128) {
        self.running
            .lock()
            .unwrap()
            .remove(request_id)
            .map(|(name, t)| (name, t.elapsed().as_millis()))
            .unwrap_or_default()
    }
}

impl ConversionObserver for CliProgressObserver {
    fn on_request_start(&self, request_id: &str, file_name: &str, _target: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(request_id.to_string(), (file_name.to_string(), Instant::now()));
        self.bar.set_message(file_name.to_string());
    }

    fn on_request_complete(&self, request_id: &str, output: &ConversionOutput) {
        let (name, elapsed_ms) = self.take(request_id);
        self.bar.println(format!(
            "  {} {:<32} → {:<32} {}  {}",
            green("✓"),
            name,
            output.file_name,
            dim(&format!("{:>9} bytes", output.stats.output_bytes)),
            dim(&format!("{:.1}s {}", elapsed_ms as f64 / 1000.0, output.backend)),
        ));
        self.bar.inc(1);
    }

    fn on_request_failed(&self, request_id: &str, failure: &ConversionFailure) {
        let (name, elapsed_ms) = self.take(request_id);

        // Truncate very long diagnostics to keep output tidy.
        let msg = failure.diagnostic_message();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };

        self.bar.println(format!(
            "  {} {:<32} {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{:.1}s at {}", elapsed_ms as f64 / 1000.0, failure.stage)),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Office document to PDF (written to ./slide.pdf)
  docconv slide.pptx --to pdf

  # PDF to editable Word, via the structured converter
  docconv report.pdf --to docx -o converted/

  # Many files, four conversions at a time
  docconv --to pdf -c 4 invoices/*.docx -o out/

  # Check that the converters are installed
  docconv --health

  # Remove scratch files left behind by a crash
  docconv --sweep

ROUTING:
  Source        Target            Backend
  ───────────   ───────────────   ────────────────────────────
  pdf           docx, doc, odt    pdf-to-word (always writes .docx)
  anything      pdf, docx, doc,   office-suite (soffice / libreoffice)
                rtf, odt, xlsx,
                pptx

ENVIRONMENT VARIABLES:
  DOCCONV_OUTPUT_DIR       Default for --output-dir
  DOCCONV_CONCURRENCY      Default for --concurrency
  DOCCONV_CONFIG           JSON config file (see OrchestratorConfig)
  DOCCONV_SCRATCH_DIR      Scratch directory for staged files
  DOCCONV_OFFICE_BIN       Office-suite executables, comma separated
  DOCCONV_PYTHON           Interpreter for the PDF-to-Word converter
  DOCCONV_PDF2WORD_SCRIPT  Path to pdf2word.py
  DOCCONV_OFFICE_TIMEOUT   Office-suite timeout in seconds
  DOCCONV_PDF2WORD_TIMEOUT PDF-to-Word timeout in seconds
  RUST_LOG                 Overrides the log filter
"#;

/// Convert documents between office formats and PDF.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Convert documents between office formats and PDF",
    long_about = "Convert documents between office formats and PDF by orchestrating a headless \
office suite (LibreOffice) and a structured PDF-to-Word converter. Every request gets its own \
scratch files, a time limit and guaranteed cleanup.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to convert.
    #[arg(required_unless_present_any = ["health", "sweep"])]
    inputs: Vec<PathBuf>,

    /// Target format: pdf, docx, doc, rtf, odt, xlsx, pptx.
    #[arg(short, long, required_unless_present_any = ["health", "sweep"])]
    to: Option<String>,

    /// Directory to write converted files into.
    #[arg(short, long = "output-dir", env = "DOCCONV_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Number of conversions run at once.
    #[arg(short, long, env = "DOCCONV_CONCURRENCY", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=256))]
    concurrency: u32,

    /// JSON config file; flags below override its values.
    #[arg(long, env = "DOCCONV_CONFIG")]
    config: Option<PathBuf>,

    /// Scratch directory for staged inputs and backend outputs.
    #[arg(long, env = "DOCCONV_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Office-suite executables, tried in order.
    #[arg(long, env = "DOCCONV_OFFICE_BIN", value_delimiter = ',')]
    office_bin: Vec<String>,

    /// Interpreter used to run the PDF-to-Word converter.
    #[arg(long, env = "DOCCONV_PYTHON")]
    python: Option<String>,

    /// Path to the PDF-to-Word converter script.
    #[arg(long, env = "DOCCONV_PDF2WORD_SCRIPT")]
    pdf2word_script: Option<String>,

    /// Office-suite timeout in seconds.
    #[arg(long, env = "DOCCONV_OFFICE_TIMEOUT")]
    office_timeout: Option<u64>,

    /// PDF-to-Word timeout in seconds.
    #[arg(long, env = "DOCCONV_PDF2WORD_TIMEOUT")]
    pdf2word_timeout: Option<u64>,

    /// Output structured JSON instead of log lines.
    #[arg(long, env = "DOCCONV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Probe the backends and print a health report.
    #[arg(long)]
    health: bool,

    /// Remove stale scratch entries and exit.
    #[arg(long)]
    sweep: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCCONV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let converting = !cli.health && !cli.sweep;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = converting && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(|| CliProgressObserver::new(cli.inputs.len()));
    let config = build_config(&cli, progress.clone().map(|p| p as SharedObserver))?;
    let orchestrator = Orchestrator::new(config).context("Invalid configuration")?;

    // ── Health mode ──────────────────────────────────────────────────────
    if cli.health {
        let report = orchestrator.check_backends().await;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else {
            let status = match report.status {
                HealthStatus::Healthy => green("healthy"),
                HealthStatus::Degraded => cyan("degraded"),
                HealthStatus::Unavailable => red("unavailable"),
            };
            println!("Status:  {status}");
            for (name, backend) in &report.backends {
                let mark = if backend.available { green("✓") } else { red("✗") };
                let detail = match (&backend.version, &backend.error) {
                    (Some(v), _) => v.clone(),
                    (None, Some(e)) => e.clone(),
                    (None, None) => String::new(),
                };
                println!("  {mark} {:<14} {}", name, dim(&detail));
            }
        }
        if report.status == HealthStatus::Unavailable {
            std::process::exit(1);
        }
        return Ok(());
    }

    // ── Startup sweep ────────────────────────────────────────────────────
    let sweep = orchestrator
        .sweep_stale()
        .await
        .context("Failed to sweep scratch directory")?;
    if cli.sweep {
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&sweep).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            eprintln!(
                "Removed {} stale entries from {} ({} kept, {} errors)",
                sweep.removed,
                orchestrator.workspaces().root().display(),
                sweep.skipped,
                sweep.errors.len()
            );
        }
        return Ok(());
    }

    // ── Run conversions ──────────────────────────────────────────────────
    let target = cli.to.as_deref().context("--to is required")?;
    let total = cli.inputs.len();
    let started = Instant::now();

    let results: Vec<(&Path, Result<PathBuf, ConversionFailure>)> = stream::iter(&cli.inputs)
        .map(|input| {
            let orchestrator = &orchestrator;
            let output_dir = &cli.output_dir;
            async move {
                let result = orchestrator.convert_file(input, target, output_dir).await;
                (input.as_path(), result)
            }
        })
        .buffer_unordered(cli.concurrency as usize)
        .collect()
        .await;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if let Some(ref progress) = progress {
        progress.finish(total, failed);
    }

    if cli.json {
        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|(input, result)| match result {
                Ok(path) => serde_json::json!({
                    "input": input,
                    "success": true,
                    "output": path,
                }),
                Err(f) => serde_json::json!({
                    "input": input,
                    "success": false,
                    "error": {
                        "stage": f.stage,
                        "backend": f.backend,
                        "kind": f.error.kind(),
                        "message": f.diagnostic_message(),
                        "retryable_with_different_input": f.is_retryable_with_different_input(),
                    },
                }),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialise output")?
        );
    } else if !cli.quiet && !show_progress {
        for (input, result) in &results {
            match result {
                Ok(path) => eprintln!(
                    "{} {}  →  {}",
                    green("✔"),
                    input.display(),
                    bold(&path.display().to_string())
                ),
                Err(f) => eprintln!("{} {}  {}", red("✘"), input.display(), red(&f.to_string())),
            }
        }
        eprintln!(
            "Converted {}/{} files in {}ms",
            total - failed,
            total,
            started.elapsed().as_millis()
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} conversions failed");
    }
    Ok(())
}

/// Map CLI args to `OrchestratorConfig`.
fn build_config(cli: &Cli, observer: Option<SharedObserver>) -> Result<OrchestratorConfig> {
    let mut config = match cli.config {
        Some(ref path) => OrchestratorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => OrchestratorConfig::default(),
    };

    if let Some(ref dir) = cli.scratch_dir {
        config.scratch_dir = dir.clone();
    }
    if !cli.office_bin.is_empty() {
        config.office_binaries = cli.office_bin.clone();
    }
    if let Some(ref python) = cli.python {
        config.pdf_to_word_program = python.clone();
    }
    if let Some(ref script) = cli.pdf2word_script {
        config.pdf_to_word_args = vec![script.clone()];
    }
    if let Some(secs) = cli.office_timeout {
        config.office_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(secs) = cli.pdf2word_timeout {
        config.pdf_to_word_timeout_ms = secs.saturating_mul(1000);
    }
    config.observer = observer;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
