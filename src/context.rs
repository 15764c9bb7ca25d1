//! Per-request context and the observer hook.
//!
//! Nothing about a request lives in process-wide state. A [`RequestContext`]
//! is created when `convert` is called and passed by reference through the
//! orchestrator, the workspace and the backend adapter. It carries the
//! request id (which namespaces every scratch file) and the caller's
//! [`ConversionObserver`].
//!
//! # Observer
//!
//! Inject an [`Arc<dyn ConversionObserver>`] via
//! [`crate::config::OrchestratorConfigBuilder::observer`] to receive events as
//! a request moves through its states. Callers forward these to metrics, a
//! progress bar or a test counter; the library never interprets them.
//!
//! ```rust
//! use docconv::{ConversionObserver, OrchestratorConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! #[derive(Default)]
//! struct Releases(AtomicUsize);
//!
//! impl ConversionObserver for Releases {
//!     fn on_workspace_released(&self, _request_id: &str, _removed: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = OrchestratorConfig::builder()
//!     .observer(Arc::new(Releases::default()))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{ConversionFailure, Stage};
use crate::output::ConversionOutput;
use std::sync::Arc;
use std::time::Instant;

/// Receives lifecycle events for each conversion request.
///
/// Requests run concurrently, so implementations must be `Send + Sync` and
/// protect shared state themselves. All methods default to no-ops.
pub trait ConversionObserver: Send + Sync {
    /// Called once, before validation or routing.
    fn on_request_start(&self, request_id: &str, file_name: &str, target: &str) {
        let _ = (request_id, file_name, target);
    }

    /// Called on every successful state transition.
    fn on_stage(&self, request_id: &str, stage: Stage) {
        let _ = (request_id, stage);
    }

    /// Called immediately before a backend subprocess is spawned.
    fn on_backend_spawn(&self, request_id: &str, backend: &str, program: &str) {
        let _ = (request_id, backend, program);
    }

    /// Called exactly once per request, when its workspace is removed.
    ///
    /// # Arguments
    /// * `removed`: number of scratch entries deleted
    fn on_workspace_released(&self, request_id: &str, removed: usize) {
        let _ = (request_id, removed);
    }

    /// Called when a request completes successfully.
    fn on_request_complete(&self, request_id: &str, output: &ConversionOutput) {
        let _ = (request_id, output);
    }

    /// Called when a request fails at any stage.
    fn on_request_failed(&self, request_id: &str, failure: &ConversionFailure) {
        let _ = (request_id, failure);
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}

/// Convenience alias matching the type stored in the config.
pub type SharedObserver = Arc<dyn ConversionObserver>;

/// State for exactly one conversion request.
#[derive(Clone)]
pub struct RequestContext {
    request_id: String,
    observer: SharedObserver,
    started: Instant,
}

impl RequestContext {
    /// Create a context with a fresh request id.
    pub fn new(observer: Option<SharedObserver>) -> Self {
        Self::with_id(new_request_id(), observer)
    }

    pub fn with_id(request_id: impl Into<String>, observer: Option<SharedObserver>) -> Self {
        Self {
            request_id: request_id.into(),
            observer: observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn observer(&self) -> &dyn ConversionObserver {
        self.observer.as_ref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("observer", &"<dyn ConversionObserver>")
            .finish()
    }
}

/// A new request id: 32 lowercase hex chars (UUID v4, simple form).
///
/// Hyphen-free so `{request_id}-…` prefixes split unambiguously.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        stages: AtomicUsize,
        spawns: AtomicUsize,
        releases: AtomicUsize,
    }

    impl ConversionObserver for Tracking {
        fn on_stage(&self, _request_id: &str, _stage: Stage) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backend_spawn(&self, _request_id: &str, _backend: &str, _program: &str) {
            self.spawns.fetch_add(1, Ordering::SeqCst);
        }

        fn on_workspace_released(&self, _request_id: &str, _removed: usize) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let ctx = RequestContext::new(None);
        ctx.observer().on_request_start(ctx.request_id(), "a.docx", "pdf");
        ctx.observer().on_stage(ctx.request_id(), Stage::Routed);
        ctx.observer().on_workspace_released(ctx.request_id(), 3);
    }

    #[test]
    fn events_reach_the_shared_observer() {
        let tracker = Arc::new(Tracking::default());
        let ctx = RequestContext::new(Some(tracker.clone() as SharedObserver));
        ctx.observer().on_stage(ctx.request_id(), Stage::Routed);
        ctx.observer().on_stage(ctx.request_id(), Stage::Staged);
        ctx.observer().on_backend_spawn(ctx.request_id(), "office-suite", "soffice");
        ctx.observer().on_workspace_released(ctx.request_id(), 1);

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.spawns.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_ids_are_unique_hex() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
