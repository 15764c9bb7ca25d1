//! Per-request scratch workspaces.
//!
//! Every request gets a [`Workspace`]: a set of entries in the shared scratch
//! directory, all named with the request id as prefix:
//!
//! ```text
//! <scratch>/
//!   <rid>-<nanos>-<base>.<ext>     staged input
//!   <rid>-out/                     backend output directory
//!   <rid>-profile/                 isolated office user profile
//! ```
//!
//! The prefix is what makes cleanup total: [`Workspace::release`] removes the
//! entries it tracked *and* anything else whose name starts with the request
//! id, which catches files a backend created on its own. Release is
//! idempotent, and `Drop` performs it if the owner never did (cancelled
//! future, panic), so a workspace never outlives its request.
//!
//! Crash recovery is handled by [`WorkspaceManager::sweep_stale`], run once
//! at startup.

use crate::context::RequestContext;
use crate::error::ConvertError;
use crate::format::DocumentFormat;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Longest sanitised base name kept in a staged file name.
const MAX_BASE_LEN: usize = 64;

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9.-]").unwrap());

/// Scratch entries owned by some request: 32 hex chars then `-`.
static RE_REQUEST_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{32}-").unwrap());

/// Hands out workspaces rooted in one scratch directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the workspace layout for a request.
    ///
    /// Pure path arithmetic: nothing is created until [`Workspace::stage`],
    /// so acquisition cannot fail and can happen before routing.
    pub fn acquire(
        &self,
        ctx: &RequestContext,
        original_name: &str,
        source: Option<DocumentFormat>,
    ) -> Workspace {
        let request_id = ctx.request_id().to_string();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let base = sanitize_base_name(original_name);
        let stem = format!("{request_id}-{nanos}-{base}");
        let ext = source
            .map(|f| f.extension().to_string())
            .unwrap_or_else(|| "bin".to_string());

        let input_path = self.root.join(format!("{stem}.{ext}"));
        let output_dir = self.root.join(format!("{request_id}-out"));
        let profile_dir = self.root.join(format!("{request_id}-profile"));

        debug!(request_id = %request_id, input = %input_path.display(), "Workspace acquired");

        Workspace {
            ctx: ctx.clone(),
            root: self.root.clone(),
            stem,
            input_path,
            output_dir,
            profile_dir,
            tracked: Vec::new(),
            released: false,
        }
    }

    /// Remove request-prefixed scratch entries older than `max_age`.
    ///
    /// Meant to run once at startup, before any request is served, to clean
    /// up after a crash. Entries whose names do not carry a request-id prefix
    /// are never touched.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<SweepReport, ConvertError> {
        let root = self.root.clone();
        let report = tokio::task::spawn_blocking(move || sweep_blocking(&root, max_age))
            .await
            .map_err(|e| ConvertError::Internal(format!("Sweep task panicked: {e}")))?;

        if report.removed > 0 || !report.errors.is_empty() {
            info!(
                removed = report.removed,
                errors = report.errors.len(),
                "Swept stale scratch entries from {}",
                self.root.display()
            );
        }
        Ok(report)
    }
}

/// Outcome of [`WorkspaceManager::sweep_stale`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Entries deleted.
    pub removed: usize,
    /// Request-prefixed entries kept because they are still fresh.
    pub skipped: usize,
    /// Entries that could not be inspected or deleted.
    pub errors: Vec<String>,
}

/// The scratch entries belonging to one request.
pub struct Workspace {
    ctx: RequestContext,
    root: PathBuf,
    stem: String,
    input_path: PathBuf,
    output_dir: PathBuf,
    profile_dir: PathBuf,
    tracked: Vec<PathBuf>,
    released: bool,
}

impl Workspace {
    pub fn request_id(&self) -> &str {
        self.ctx.request_id()
    }

    /// Where the input bytes are (or will be) staged.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Directory the backend writes its output into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Isolated office user-profile directory.
    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Fixed output path for backends that accept one.
    pub fn output_path_for(&self, format: DocumentFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.stem, format.extension()))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Register an extra path for removal on release.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.tracked.push(path.into());
    }

    /// Create the workspace directories and write the input bytes.
    ///
    /// The input file is opened with `create_new`, so an existing path is
    /// never overwritten.
    pub async fn stage(&mut self, bytes: &[u8]) -> Result<(), ConvertError> {
        let staging_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| ConvertError::StagingFailure { path, source }
        };

        for dir in [&self.root, &self.output_dir, &self.profile_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(staging_err(dir.as_path()))?;
        }
        self.tracked.push(self.output_dir.clone());
        self.tracked.push(self.profile_dir.clone());

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.input_path)
            .await
            .map_err(staging_err(self.input_path.as_path()))?;
        self.tracked.push(self.input_path.clone());

        file.write_all(bytes)
            .await
            .map_err(staging_err(self.input_path.as_path()))?;
        file.flush().await.map_err(staging_err(self.input_path.as_path()))?;

        debug!(
            request_id = %self.request_id(),
            bytes = bytes.len(),
            "Staged input at {}",
            self.input_path.display()
        );
        Ok(())
    }

    /// Remove every entry of this workspace. Idempotent.
    ///
    /// Returns the number of entries removed by this call (0 if already
    /// released). Removal errors are logged, never returned. Removal and the
    /// `on_workspace_released` event happen together on a blocking task, so
    /// both complete even if this future is dropped mid-await.
    pub async fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        let root = self.root.clone();
        let ctx = self.ctx.clone();
        let tracked = std::mem::take(&mut self.tracked);
        let cleanup = tokio::task::spawn_blocking(move || {
            let removed = remove_request_entries(&root, ctx.request_id(), &tracked);
            ctx.observer().on_workspace_released(ctx.request_id(), removed);
            removed
        });
        match cleanup.await {
            Ok(n) => n,
            Err(e) => {
                warn!(request_id = %self.request_id(), "Cleanup task panicked: {e}");
                self.ctx
                    .observer()
                    .on_workspace_released(self.ctx.request_id(), 0);
                0
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let tracked = std::mem::take(&mut self.tracked);
        let removed = remove_request_entries(&self.root, self.ctx.request_id(), &tracked);
        debug!(
            request_id = %self.ctx.request_id(),
            removed,
            "Workspace released on drop"
        );
        self.ctx
            .observer()
            .on_workspace_released(self.ctx.request_id(), removed);
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("request_id", &self.ctx.request_id())
            .field("input_path", &self.input_path)
            .field("output_dir", &self.output_dir)
            .field("released", &self.released)
            .finish()
    }
}

/// Reduce a user-supplied file name to a safe base (no extension).
///
/// Strips directory components (both separators), replaces anything outside
/// `[A-Za-z0-9.-]` with `_`, and caps the length.
pub fn sanitize_base_name(original: &str) -> String {
    let file_name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let cleaned = RE_UNSAFE_CHARS.replace_all(stem, "_");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        return "document".to_string();
    }
    cleaned.chars().take(MAX_BASE_LEN).collect()
}

/// Remove `tracked` and every entry of `root` prefixed by `request_id`.
fn remove_request_entries(root: &Path, request_id: &str, tracked: &[PathBuf]) -> usize {
    let mut removed = 0;

    for path in tracked {
        match remove_entry(path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(request_id, "Failed to remove {}: {e}", path.display()),
        }
    }

    let prefix = format!("{request_id}-");
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return removed,
        Err(e) => {
            warn!(request_id, "Cannot scan {} for leftovers: {e}", root.display());
            return removed;
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        match remove_entry(&path) {
            Ok(true) => {
                debug!(request_id, "Removed leftover {}", path.display());
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!(request_id, "Failed to remove {}: {e}", path.display()),
        }
    }

    removed
}

/// Remove a file or directory tree. `Ok(false)` if it was already gone.
fn remove_entry(path: &Path) -> io::Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sweep_blocking(root: &Path, max_age: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.errors.push(format!("{}: {e}", root.display()));
            return report;
        }
    };
    let now = SystemTime::now();

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !RE_REQUEST_PREFIX.is_match(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|mtime| now.duration_since(mtime).unwrap_or(Duration::ZERO));
        match age {
            Ok(age) if age >= max_age => match remove_entry(&path) {
                Ok(_) => report.removed += 1,
                Err(e) => report.errors.push(format!("{}: {e}", path.display())),
            },
            Ok(_) => report.skipped += 1,
            Err(e) => report.errors.push(format!("{}: {e}", path.display())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ConversionObserver, SharedObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct ReleaseCounter(AtomicUsize);

    impl ConversionObserver for ReleaseCounter {
        fn on_workspace_released(&self, _request_id: &str, _removed: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ctx_with(counter: &Arc<ReleaseCounter>) -> RequestContext {
        RequestContext::new(Some(counter.clone() as SharedObserver))
    }

    #[test]
    fn sanitize_strips_paths_and_unsafe_chars() {
        assert_eq!(sanitize_base_name("report.pdf"), "report");
        assert_eq!(sanitize_base_name("../../etc/passwd.docx"), "passwd");
        assert_eq!(sanitize_base_name("C:\\Users\\me\\My File (1).docx"), "My_File__1_");
        assert_eq!(sanitize_base_name("$(rm -rf ~).pdf"), "__rm_-rf___");
        assert_eq!(sanitize_base_name("..."), "document");
        assert_eq!(sanitize_base_name(""), "document");
        assert_eq!(sanitize_base_name(&"a".repeat(200)).len(), MAX_BASE_LEN);
    }

    #[test]
    fn staged_names_are_request_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path());
        let counter = Arc::new(ReleaseCounter::default());
        let a = mgr.acquire(&ctx_with(&counter), "report.pdf", Some(DocumentFormat::Pdf));
        let b = mgr.acquire(&ctx_with(&counter), "report.pdf", Some(DocumentFormat::Pdf));

        assert_ne!(a.input_path(), b.input_path());
        let name = a.input_path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(a.request_id()));
        assert!(name.ends_with("-report.pdf"), "got {name}");
        assert!(a.output_path_for(DocumentFormat::Docx).starts_with(a.output_dir()));
    }

    #[tokio::test]
    async fn release_removes_everything_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path());
        let counter = Arc::new(ReleaseCounter::default());
        let mut ws = mgr.acquire(&ctx_with(&counter), "in.docx", Some(DocumentFormat::Docx));

        ws.stage(b"hello").await.unwrap();
        assert_eq!(std::fs::read(ws.input_path()).unwrap(), b"hello");

        // A file the backend created on its own, next to the input.
        let stray = dir.path().join(format!("{}-stray.tmp", ws.request_id()));
        std::fs::write(&stray, b"x").unwrap();
        // An unrelated file that must survive.
        let unrelated = dir.path().join("keep-me.txt");
        std::fs::write(&unrelated, b"x").unwrap();

        let removed = ws.release().await;
        assert!(removed >= 4, "removed {removed}");
        assert!(!ws.input_path().exists());
        assert!(!ws.output_dir().exists());
        assert!(!ws.profile_dir().exists());
        assert!(!stray.exists());
        assert!(unrelated.exists());

        assert_eq!(ws.release().await, 0);
        drop(ws);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_interrupted_at_await_still_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path());
        let counter = Arc::new(ReleaseCounter::default());
        let mut ws = mgr.acquire(&ctx_with(&counter), "in.odt", Some(DocumentFormat::Odt));
        ws.stage(b"PK").await.unwrap();
        let input = ws.input_path().to_path_buf();

        // One poll starts the cleanup; the release future is then dropped.
        let _ = tokio::time::timeout(Duration::ZERO, ws.release()).await;

        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!input.exists());

        assert_eq!(ws.release().await, 0);
        drop(ws);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_releases_unreleased_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path());
        let counter = Arc::new(ReleaseCounter::default());
        let input;
        {
            let mut ws = mgr.acquire(&ctx_with(&counter), "in.rtf", Some(DocumentFormat::Rtf));
            ws.stage(b"{\\rtf1}").await.unwrap();
            input = ws.input_path().to_path_buf();
            assert!(input.exists());
        }
        assert!(!input.exists());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_without_stage_still_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path().join("never-created"));
        let counter = Arc::new(ReleaseCounter::default());
        let mut ws = mgr.acquire(&ctx_with(&counter), "x.docx", None);
        assert_eq!(ws.release().await, 0);
        drop(ws);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn staging_into_a_file_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mgr = WorkspaceManager::new(&blocker);
        let mut ws = mgr.acquire(&RequestContext::new(None), "a.pdf", Some(DocumentFormat::Pdf));
        let err = ws.stage(b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, ConvertError::StagingFailure { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn sweep_only_touches_old_request_entries() {
        let dir = tempfile::tempdir().unwrap();
        let rid = crate::context::new_request_id();
        let owned = dir.path().join(format!("{rid}-123-old.pdf"));
        let owned_dir = dir.path().join(format!("{rid}-out"));
        let foreign = dir.path().join("someone-else.pdf");
        std::fs::write(&owned, b"x").unwrap();
        std::fs::create_dir(&owned_dir).unwrap();
        std::fs::write(&foreign, b"x").unwrap();

        let mgr = WorkspaceManager::new(dir.path());

        let fresh = mgr.sweep_stale(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(fresh.removed, 0);
        assert_eq!(fresh.skipped, 2);
        assert!(owned.exists());

        let report = mgr.sweep_stale(Duration::ZERO).await.unwrap();
        assert_eq!(report.removed, 2);
        assert!(report.errors.is_empty());
        assert!(!owned.exists());
        assert!(!owned_dir.exists());
        assert!(foreign.exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WorkspaceManager::new(dir.path().join("absent"));
        let report = mgr.sweep_stale(Duration::ZERO).await.unwrap();
        assert_eq!(report.removed, 0);
        assert!(report.errors.is_empty());
    }
}
