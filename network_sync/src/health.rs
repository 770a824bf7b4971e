use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JobStatus {
    pub last_started: Option<DateTime<Utc>>,
    pub last_succeeded: Option<DateTime<Utc>>,
    pub last_failed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub runs: u64,
    pub skipped: u64,
}

/// Per-job run history shared between the scheduler and the health endpoint.
#[derive(Debug, Default)]
pub struct HealthState {
    jobs: RwLock<BTreeMap<&'static str, JobStatus>>,
}

impl HealthState {
    pub fn started(&self, job: &'static str) {
        let mut jobs = self.jobs.write();
        let status = jobs.entry(job).or_default();
        status.last_started = Some(Utc::now());
        status.runs += 1;
    }

    pub fn succeeded(&self, job: &'static str) {
        self.jobs.write().entry(job).or_default().last_succeeded = Some(Utc::now());
    }

    pub fn failed(&self, job: &'static str, error: String) {
        let mut jobs = self.jobs.write();
        let status = jobs.entry(job).or_default();
        status.last_failed = Some(Utc::now());
        status.last_error = Some(error);
    }

    pub fn skipped(&self, job: &'static str) {
        self.jobs.write().entry(job).or_default().skipped += 1;
    }

    #[cfg(test)]
    pub fn status(&self, job: &str) -> Option<JobStatus> {
        self.jobs.read().get(job).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, JobStatus> {
        self.jobs.read().clone()
    }
}

#[derive(Clone)]
struct AxumState {
    health: Arc<HealthState>,
}

pub fn router(health: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(AxumState { health })
}

pub async fn run_health_server(
    addr: String,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(addr, "starting axum health server");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(health))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn health_check(State(state): State<AxumState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.snapshot()))
}
