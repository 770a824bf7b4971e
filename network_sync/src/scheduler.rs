//! Interval scheduling with singleton execution: a tick that arrives while the
//! previous run of the same job is still going is dropped, never queued.

use crate::error::PassError;
use crate::health::HealthState;
use crate::metrics::PassMetrics;
use opentelemetry::KeyValue;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Scheduler {
    health: Arc<HealthState>,
    metrics: PassMetrics,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(health: Arc<HealthState>, shutdown: CancellationToken) -> Self {
        Self {
            health,
            metrics: PassMetrics::default(),
            shutdown,
        }
    }

    /// Spawns the ticker for `job`. The first run starts immediately. After
    /// shutdown is requested no new run starts, and the returned handle
    /// resolves once any run in progress has finished.
    pub fn spawn<F, Fut>(&self, name: &'static str, period: Duration, job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PassError>> + Send + 'static,
    {
        tokio::spawn(run_job(
            name,
            period,
            Arc::clone(&self.health),
            self.metrics.clone(),
            self.shutdown.clone(),
            job,
        ))
    }
}

async fn run_job<F, Fut>(
    name: &'static str,
    period: Duration,
    health: Arc<HealthState>,
    metrics: PassMetrics,
    shutdown: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), PassError>> + Send + 'static,
{
    info!(job = name, period = %humantime::format_duration(period), "scheduling job");
    let running = Arc::new(AtomicBool::new(false));
    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if running.swap(true, Ordering::AcqRel) {
            debug!(job = name, "previous run still in progress, skipping tick");
            health.skipped(name);
            continue;
        }

        health.started(name);
        let run = job();
        let running = Arc::clone(&running);
        let health = Arc::clone(&health);
        let metrics = metrics.clone();
        in_flight = Some(tokio::spawn(async move {
            // A panicking run surfaces here as a JoinError and still releases the slot
            match tokio::spawn(run).await {
                Ok(Ok(())) => health.succeeded(name),
                Ok(Err(e)) => {
                    warn!(job = name, error = ?e, "job run failed");
                    metrics.failed.add(1, &[KeyValue::new("job", name)]);
                    health.failed(name, e.to_string());
                }
                Err(join) => {
                    warn!(job = name, error = ?join, "job run panicked");
                    metrics.failed.add(1, &[KeyValue::new("job", name)]);
                    health.failed(name, join.to_string());
                }
            }
            running.store(false, Ordering::Release);
        }));
    }

    if let Some(handle) = in_flight {
        debug!(job = name, "waiting for in-progress run before stopping");
        if let Err(e) = handle.await {
            warn!(job = name, error = ?e, "job runner task failed");
        }
    }
    info!(job = name, "job stopped");
}
