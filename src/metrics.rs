use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

/// Process-local counters for authentication load.
///
/// Counters are per-instance and best-effort; they are not aggregated
/// across replicas. The in-flight gauge is maintained by an RAII guard so
/// it cannot leak on early returns.
#[derive(Default)]
pub struct AuthMetrics {
    active_verifications: AtomicU64,
    total_verifications: AtomicU64,
    failed_verifications: AtomicU64,
    logins: AtomicU64,
    failed_logins: AtomicU64,
}

/// Point-in-time snapshot served by the /metrics endpoint
#[derive(Debug, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub active_verifications: u64,
    pub total_verifications: u64,
    pub failed_verifications: u64,
    pub logins: u64,
    pub failed_logins: u64,
}

impl AuthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a token verification as in flight until the guard drops
    pub fn verification_guard(self: &Arc<Self>) -> VerificationGuard {
        self.active_verifications.fetch_add(1, Ordering::Relaxed);
        self.total_verifications.fetch_add(1, Ordering::Relaxed);
        debug!(
            active = self.active_verifications.load(Ordering::Relaxed),
            "Token verification started"
        );
        VerificationGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn record_verification_failure(&self) {
        self.failed_verifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login_failure(&self) {
        self.failed_logins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_verifications: self.active_verifications.load(Ordering::Relaxed),
            total_verifications: self.total_verifications.load(Ordering::Relaxed),
            failed_verifications: self.failed_verifications.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
            failed_logins: self.failed_logins.load(Ordering::Relaxed),
        }
    }
}

pub struct VerificationGuard {
    metrics: Arc<AuthMetrics>,
}

impl Drop for VerificationGuard {
    fn drop(&mut self) {
        self.metrics
            .active_verifications
            .fetch_sub(1, Ordering::Relaxed);
    }
}
