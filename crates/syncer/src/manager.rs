//! Reconcile deadline, retry classification, per-request backoff and
//! transport health.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vsync_core::{ErrorClass, ReconcileOutcome, ReconcileRequest, SyncError, SyncOptions, SyncResult};

use crate::registry::SyncRegistry;

/// First backoff step for conflicts and transport failures.
pub const BASE_BACKOFF: Duration = Duration::from_millis(5);

/// Follow-up for a request after one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Done,
    RequeueAfter(Duration),
    Backoff { class: ErrorClass, delay: Duration },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub consecutive_failures: u32,
    pub degraded: bool,
    pub last_error: Option<String>,
}

/// Transport health fed by reconcile results; degraded after N consecutive failures.
pub struct Health {
    snap: ArcSwap<HealthSnapshot>,
    threshold: u32,
    degraded_tx: watch::Sender<bool>,
}

impl Health {
    pub fn new(threshold: u32) -> Self {
        let (degraded_tx, _) = watch::channel(false);
        Self { snap: ArcSwap::from_pointee(HealthSnapshot::default()), threshold: threshold.max(1), degraded_tx }
    }

    pub fn current(&self) -> Arc<HealthSnapshot> {
        self.snap.load_full()
    }

    pub fn is_degraded(&self) -> bool {
        self.snap.load().degraded
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.degraded_tx.subscribe()
    }

    fn record_success(&self) {
        if self.snap.load().consecutive_failures == 0 {
            return;
        }
        self.snap.store(Arc::new(HealthSnapshot::default()));
        self.publish(false);
    }

    fn record_transport_failure(&self, err: &SyncError) {
        let threshold = self.threshold;
        let prev = self.snap.rcu(|cur| {
            let failures = cur.consecutive_failures.saturating_add(1);
            HealthSnapshot { consecutive_failures: failures, degraded: failures >= threshold, last_error: Some(err.to_string()) }
        });
        if !prev.degraded && prev.consecutive_failures.saturating_add(1) >= threshold {
            warn!(failures = threshold, error = %err, "sync degraded");
        }
        self.publish(self.is_degraded());
    }

    fn publish(&self, degraded: bool) {
        metrics::gauge!("sync_degraded", if degraded { 1.0 } else { 0.0 });
        self.degraded_tx.send_if_modified(|cur| std::mem::replace(cur, degraded) != degraded);
    }
}

/// Retry policy around single reconcile passes.
///
/// Scheduling belongs to the caller (the kube runtime controller in
/// `vsyncctl run`); this type owns the deadline, the error classification,
/// the per-request backoff and the transport health signal.
pub struct SyncManager {
    registry: Arc<SyncRegistry>,
    options: Arc<SyncOptions>,
    health: Arc<Health>,
    failures: Mutex<FxHashMap<ReconcileRequest, u32>>,
}

impl SyncManager {
    pub fn new(registry: SyncRegistry, options: Arc<SyncOptions>) -> Self {
        let health = Arc::new(Health::new(options.degraded_after_failures));
        Self { registry: Arc::new(registry), options, health, failures: Mutex::new(FxHashMap::default()) }
    }

    pub fn health(&self) -> Arc<Health> {
        Arc::clone(&self.health)
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn failures(&self) -> MutexGuard<'_, FxHashMap<ReconcileRequest, u32>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One dispatch under the reconcile deadline. Success resets backoff and health.
    pub async fn reconcile(&self, req: &ReconcileRequest) -> SyncResult<ReconcileOutcome> {
        let started = Instant::now();
        let timeout = self.options.reconcile_timeout();
        let result = match tokio::time::timeout(timeout, self.registry.dispatch(req)).await {
            Ok(r) => r,
            Err(_) => Err(SyncError::Timeout(format!("reconcile exceeded {:?}", timeout))),
        };
        let elapsed_ms = started.elapsed().as_millis() as f64;
        metrics::histogram!("reconcile_latency_ms", elapsed_ms, "kind" => req.kind.clone());
        if result.is_ok() {
            self.failures().remove(req);
            self.health.record_success();
            metrics::counter!("reconcile_total", 1u64, "kind" => req.kind.clone(), "outcome" => "ok");
        }
        debug!(request = %req, elapsed_ms, ok = result.is_ok(), "reconciled");
        result
    }

    /// Decide the follow-up for a failed pass.
    pub fn on_error(&self, req: &ReconcileRequest, err: &SyncError) -> Disposition {
        let class = err.class();
        metrics::counter!("reconcile_total", 1u64, "kind" => req.kind.clone(), "outcome" => "error");
        metrics::counter!("reconcile_errors_total", 1u64, "kind" => req.kind.clone(), "class" => class.as_str());
        match class {
            ErrorClass::Validation => {
                info!(request = %req, error = %err, "translation rejected; waiting for user change");
                self.failures().remove(req);
                Disposition::RequeueAfter(self.options.validation_requeue())
            }
            ErrorClass::Conflict | ErrorClass::NotFound => {
                debug!(request = %req, error = %err, "stale read; retrying");
                Disposition::Backoff { class, delay: self.next_backoff(req) }
            }
            ErrorClass::Transport => {
                error!(request = %req, error = %err, "transport failure");
                self.health.record_transport_failure(err);
                Disposition::Backoff { class, delay: self.next_backoff(req) }
            }
        }
    }

    /// [`Self::reconcile`] followed by [`Self::on_error`] when it fails.
    pub async fn process(&self, req: &ReconcileRequest) -> Disposition {
        match self.reconcile(req).await {
            Ok(ReconcileOutcome::Done) => Disposition::Done,
            Ok(ReconcileOutcome::RequeueAfter(d)) => Disposition::RequeueAfter(d),
            Err(e) => self.on_error(req, &e),
        }
    }

    /// Consecutive failed passes of `req` since its last success.
    pub fn num_requeues(&self, req: &ReconcileRequest) -> u32 {
        self.failures().get(req).copied().unwrap_or(0)
    }

    fn next_backoff(&self, req: &ReconcileRequest) -> Duration {
        let failures = {
            let mut g = self.failures();
            let n = g.entry(req.clone()).or_insert(0);
            *n = n.saturating_add(1);
            *n
        };
        let exp = failures.saturating_sub(1).min(31);
        let max = self.options.max_backoff().max(BASE_BACKOFF);
        let delay = BASE_BACKOFF.saturating_mul(1u32 << exp).min(max);
        debug!(request = %req, failures, delay_ms = delay.as_millis() as u64, "backing off");
        delay
    }
}
