//! [`HealthMonitor`]: a periodic system-health snapshot written to the bag (spec.md §4.10).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::bag::{Key, SharedBag};

const TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Coarse health classification derived from `error_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// `error_rate < 10%`.
    Healthy,
    /// `10% <= error_rate <= 20%`.
    Warning,
    /// `error_rate > 20%`.
    Error,
}

impl HealthStatus {
    fn from_error_rate(error_rate: f64) -> Self {
        if error_rate > 0.20 {
            HealthStatus::Error
        } else if error_rate >= 0.10 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Per-component health, tolerant of missing sub-metrics (they default to zero/empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name (e.g. an external data provider).
    pub name: String,
    /// `true` if the component reported healthy on its last check.
    pub healthy: bool,
    /// Free-form detail, e.g. the last error observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The composite snapshot [`HealthMonitor`] writes into the bag under [`Key::Health`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationHealth {
    /// Overall status derived from `error_rate`.
    pub status: HealthStatus,
    /// Process uptime.
    pub uptime: Duration,
    /// Fraction of tool/tool-adjacent calls that have errored, in `[0.0, 1.0]`.
    pub error_rate: f64,
    /// Approximate resident memory usage.
    pub memory_mb: f64,
    /// Per-component health, e.g. external data providers.
    pub components_health: Vec<ComponentHealth>,
    /// When this snapshot was taken, seconds since the monitor started.
    pub last_check_secs: u64,
}

/// Source of the raw counters [`HealthMonitor`] turns into an [`ApplicationHealth`]
/// snapshot each tick. Components increment these as they operate; the monitor only
/// reads them.
#[derive(Default)]
pub struct HealthMetrics {
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    memory_mb: AtomicU64,
}

impl HealthMetrics {
    /// Record one successful call.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed call.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Report the current approximate memory usage, in megabytes.
    pub fn set_memory_mb(&self, mb: f64) {
        self.memory_mb.store(mb.round() as u64, Ordering::Relaxed);
    }

    fn error_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.failed_calls.load(Ordering::Relaxed) as f64 / total as f64
    }

    fn memory_mb_snapshot(&self) -> f64 {
        self.memory_mb.load(Ordering::Relaxed) as f64
    }
}

/// Drives the 15-second health-snapshot loop described in spec.md §4.10.
///
/// Bound to an `Arc<AtomicBool>` + `Notify` pair rather than an unsupervised
/// `tokio::spawn` so the background task's lifetime can be tied to the orchestrator's:
/// dropping the returned [`HealthMonitor`] without calling [`HealthMonitor::stop`] would
/// otherwise leak the ticking task for the life of the process.
pub struct HealthMonitor {
    metrics: Arc<HealthMetrics>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Start the background loop, writing snapshots into `bag` every 15 seconds.
    pub fn start(bag: Arc<SharedBag>, metrics: Arc<HealthMetrics>) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let started_at = Instant::now();

        let task_metrics = metrics.clone();
        let task_stopped = stopped.clone();
        let task_notify = notify.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                    _ = task_notify.notified() => break,
                }
                if task_stopped.load(Ordering::SeqCst) {
                    break;
                }
                let snapshot = ApplicationHealth {
                    status: HealthStatus::from_error_rate(task_metrics.error_rate()),
                    uptime: started_at.elapsed(),
                    error_rate: task_metrics.error_rate(),
                    memory_mb: task_metrics.memory_mb_snapshot(),
                    components_health: Vec::new(),
                    last_check_secs: started_at.elapsed().as_secs(),
                };
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("health snapshot: {:?}", snapshot.status);
                }
                bag.set(Key::Health, snapshot);
            }
        });

        Self {
            metrics,
            stopped,
            notify,
            handle: Some(handle),
        }
    }

    /// Access the metrics this monitor reads from, so other components can report into it.
    pub fn metrics(&self) -> Arc<HealthMetrics> {
        self.metrics.clone()
    }

    /// Signal the background task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
