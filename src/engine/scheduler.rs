//! Scheduler: one task per check, one sampling task
//!
//! Every probe runs in its own spawned task under the check's timeout, so
//! a hung or panicking probe only ever affects its own check. All tasks
//! live on one `TaskTracker` and observe one `CancellationToken`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::Engine;
use crate::checks::{HealthCheck, ProbeOutcome};
use crate::types::CheckResult;

/// Aborts the probe task when the probing future is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one probe with a hard deadline.
///
/// Timeout yields a failure with detail "timeout"; a panic inside the
/// probe yields a failure for this check only.
pub async fn probe_once(check: &HealthCheck) -> CheckResult {
    let probe = check.probe.clone();
    let start = Instant::now();
    let mut task = AbortOnDrop(tokio::spawn(async move { probe.probe().await }));

    match tokio::time::timeout(check.timeout, &mut task.0).await {
        Ok(Ok(ProbeOutcome::Healthy { detail })) => {
            CheckResult::healthy(&check.name, start.elapsed(), detail)
        }
        Ok(Ok(ProbeOutcome::Unhealthy { detail })) => {
            CheckResult::failed(&check.name, start.elapsed(), detail)
        }
        Ok(Err(join)) => {
            warn!(check = %check.name, error = %join, "Probe panicked");
            CheckResult::failed(&check.name, start.elapsed(), format!("probe panicked: {}", join))
        }
        Err(_) => CheckResult::timed_out(&check.name, check.timeout),
    }
}

pub struct Scheduler {
    cancel: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Flip to started; false if it already was
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn onto the tracked set (recoveries, dispatcher, loops)
    pub(crate) fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.spawn(fut)
    }

    pub(crate) fn spawn_check(&self, engine: Arc<Engine>, check: Arc<HealthCheck>) {
        let cancel = self.cancel.clone();
        self.tasks.spawn(run_check_loop(engine, check, cancel));
    }

    pub(crate) fn spawn_sampler(&self, engine: Arc<Engine>, interval: Duration) {
        let cancel = self.cancel.clone();
        self.tasks.spawn(run_sampling_loop(engine, interval, cancel));
    }

    /// Cancel everything and wait up to `grace` for tracked tasks.
    ///
    /// Returns false when tasks were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    grace_secs = grace.as_secs(),
                    "Shutdown grace elapsed with tasks still running"
                );
                false
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_check_loop(engine: Arc<Engine>, check: Arc<HealthCheck>, cancel: CancellationToken) {
    info!(
        check = %check.name,
        kind = check.probe.kind(),
        interval_secs = check.interval.as_secs_f64(),
        timeout_secs = check.timeout.as_secs_f64(),
        "Check scheduled"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(check.interval) => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = probe_once(&check) => result,
        };

        debug!(
            check = %check.name,
            healthy = result.healthy,
            latency_ms = result.latency_ms,
            "Probe complete"
        );
        engine.handle_result(result);
    }

    debug!(check = %check.name, "Check loop stopped");
}

async fn run_sampling_loop(engine: Arc<Engine>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Metric sampling started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = engine.sample_once() => {}
        }
    }

    debug!("Metric sampling stopped");
}
