//! Backend health reporting.
//!
//! A health check runs each backend's version probe concurrently and folds
//! the results into one [`HealthReport`]. It never converts anything and
//! never touches the scratch directory.

use crate::backend::{BackendStatus, ConversionBackend};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Overall availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every backend answered its probe.
    Healthy,
    /// Some, but not all, backends answered.
    Degraded,
    /// No backend answered.
    Unavailable,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unavailable => "unavailable",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Probe result per backend name.
    pub backends: BTreeMap<String, BackendStatus>,
}

impl HealthReport {
    /// Fold probe results into a report.
    pub fn from_statuses(statuses: impl IntoIterator<Item = (String, BackendStatus)>) -> Self {
        let backends: BTreeMap<_, _> = statuses.into_iter().collect();
        let up = backends.values().filter(|s| s.available).count();
        let status = if !backends.is_empty() && up == backends.len() {
            HealthStatus::Healthy
        } else if up > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unavailable
        };
        Self { status, backends }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probe every backend, concurrently, each bounded by `timeout`.
pub async fn check_backends(
    backends: &[&dyn ConversionBackend],
    timeout: Duration,
) -> HealthReport {
    let probes = backends.iter().map(|b| async move {
        let status = b.probe(timeout).await;
        (b.name().to_string(), status)
    });
    let report = HealthReport::from_statuses(futures::future::join_all(probes).await);
    info!(status = %report.status, "Backend health checked");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(available: bool) -> BackendStatus {
        BackendStatus {
            available,
            ..Default::default()
        }
    }

    #[test]
    fn status_folds_availability() {
        let r = HealthReport::from_statuses([("a".into(), status(true)), ("b".into(), status(true))]);
        assert_eq!(r.status, HealthStatus::Healthy);
        assert!(r.is_healthy());

        let r = HealthReport::from_statuses([("a".into(), status(true)), ("b".into(), status(false))]);
        assert_eq!(r.status, HealthStatus::Degraded);

        let r = HealthReport::from_statuses([("a".into(), status(false))]);
        assert_eq!(r.status, HealthStatus::Unavailable);

        let r = HealthReport::from_statuses(Vec::new());
        assert_eq!(r.status, HealthStatus::Unavailable);
    }

    #[test]
    fn report_serialises_lowercase_status() {
        let r = HealthReport::from_statuses([("office-suite".into(), status(false))]);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["backends"]["office-suite"]["available"], false);
    }
}
