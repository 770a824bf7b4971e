#![warn(clippy::pedantic)]
mod boundaries;
mod classifier;
mod database;
mod error;
mod feed;
mod health;
mod metrics;
mod notify;
mod reconcile;
mod scheduler;
mod store;
mod traffic;

use crate::boundaries::BoundaryIndex;
use crate::classifier::GeofenceClassifier;
use crate::database::PgStore;
use crate::error::MainError;
use crate::feed::{HttpFeed, LocationLookup, NetworkFeed};
use crate::health::{HealthState, run_health_server};
use crate::notify::{Dispatcher, DiscordNotifier, Notifier};
use crate::reconcile::SweepJob;
use crate::reconcile::controllers::ControllerReconciler;
use crate::reconcile::flights::FlightReconciler;
use crate::reconcile::roster::RosterReconciler;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::traffic::TrafficMonitor;
use shared::error::InitializationError;
use shared::vatsim::VatsimClient;
use shared::vatusa::VatusaClient;
use shared::{init_tracing, initialize_db, load_config, shutdown_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const NAG_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let config = load_config().map_err(InitializationError::from)?;
    let telemetry = init_tracing(&config.telemetry)?;
    info!(name: "config.loaded", "config loaded");

    let db_pool = initialize_db(&config.postgres, true).await?;
    let http_client = reqwest::Client::builder()
        .timeout(config.feed.request_timeout)
        .build()
        .map_err(InitializationError::from)?;

    let boundaries = Arc::new(BoundaryIndex::load(&config.boundaries.path)?);
    info!(facilities = boundaries.len(), path = ?config.boundaries.path, "loaded facility boundaries");

    let http_feed = Arc::new(HttpFeed::new(
        VatsimClient::new_with_client(
            http_client.clone(),
            &config.feed.datafeed_url,
            &config.feed.vatsim_api_url,
        ),
        VatusaClient::new_with_client(
            http_client.clone(),
            &config.feed.vatusa_api_url,
            &config.feed.vatusa_api_key,
            &config.feed.vatusa_facility,
            config.feed.vatusa_test_mode,
        ),
    ));
    let feed: Arc<dyn NetworkFeed> = http_feed.clone();
    let locations: Arc<dyn LocationLookup> = http_feed;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(
        http_client,
        config.discord.webhooks.clone(),
    ));
    let notifications = Dispatcher::new(Arc::clone(&notifier));

    let sweep = Arc::new(SweepJob::new(
        Arc::clone(&feed),
        FlightReconciler::new(
            Arc::clone(&store),
            GeofenceClassifier::new(boundaries),
            config.scheduler.classifier_max_workers,
        ),
        ControllerReconciler::new(
            Arc::clone(&store),
            notifications.clone(),
            config.facility.tracked_prefixes.clone(),
            config.features.controller_online,
        ),
    ));
    let roster = Arc::new(RosterReconciler::new(
        Arc::clone(&store),
        notifications.clone(),
        locations,
        config.facility.certifications.clone(),
    ));
    let traffic = Arc::new(TrafficMonitor::new(
        &config.traffic,
        Arc::clone(&feed),
        Arc::clone(&notifier),
    )?);

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let health = Arc::new(HealthState::default());
    let mut signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));
    let mut axum_handle = tokio::spawn(run_health_server(
        config.health_addr.clone(),
        Arc::clone(&health),
        shutdown_token.clone(),
    ));

    let scheduler = Scheduler::new(health, shutdown_token.clone());
    let mut job_handles: Vec<JoinHandle<()>> = Vec::new();

    job_handles.push(scheduler.spawn("sweep", config.scheduler.sweep_interval, {
        let sweep = Arc::clone(&sweep);
        move || {
            let sweep = Arc::clone(&sweep);
            async move { sweep.run().await.map(|_| ()) }
        }
    }));
    job_handles.push(scheduler.spawn("roster", config.scheduler.roster_interval, {
        let roster = Arc::clone(&roster);
        let feed = Arc::clone(&feed);
        move || {
            let roster = Arc::clone(&roster);
            let feed = Arc::clone(&feed);
            async move { roster.run(feed.as_ref()).await.map(|_| ()) }
        }
    }));
    job_handles.push(scheduler.spawn(
        "foreign_visitors",
        config.scheduler.foreign_visitor_interval,
        {
            let roster = Arc::clone(&roster);
            move || {
                let roster = Arc::clone(&roster);
                async move { roster.refresh_foreign_visitors().await.map(|_| ()) }
            }
        },
    ));
    job_handles.push(scheduler.spawn("missing_initials", NAG_INTERVAL, {
        let roster = Arc::clone(&roster);
        move || {
            let roster = Arc::clone(&roster);
            async move { roster.nag_missing_initials().await.map(|_| ()) }
        }
    }));
    if traffic.is_empty() {
        info!("no traffic alert airports configured, traffic job disabled");
    } else {
        job_handles.push(scheduler.spawn("traffic", config.scheduler.traffic_interval, {
            let traffic = Arc::clone(&traffic);
            move || {
                let traffic = Arc::clone(&traffic);
                async move { traffic.run().await.map(|_| ()) }
            }
        }));
    }

    let mut first_err: Option<MainError> = None;
    let mut axum_done = false;

    tokio::select! {
        res = &mut axum_handle => {
            info!(name: "axum.completed", "axum task completed first, propagating cancellation token to other tasks");
            axum_done = true;
            shutdown_token.cancel();
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(name: "axum.completed", error = ?e, "axum task completed due to error");
                    first_err.get_or_insert(e.into());
                }
                Err(join) => {
                    warn!(name: "axum.completed", error = ?join, "axum task completed due to error");
                    first_err.get_or_insert(join.into());
                }
            }
        }
        res = &mut signal_handle => {
            info!(name: "listener.completed", "SIGINT/SIGTERM listener task completed first, propagating cancellation token to other tasks");
            shutdown_token.cancel();
            if let Err(join) = res {
                warn!(name: "listener.completed", error = ?join, "error with SIGINT/SIGTERM listener task");
                first_err.get_or_insert(join.into());
            }
        }
    }

    if !axum_done {
        info!(name: "axum.completion.awaiting", "awaiting completion of axum task");
        match axum_handle.await {
            Ok(Ok(())) => info!(name: "axum.completed", "axum task completed successfully"),
            Ok(Err(e)) => {
                info!(name: "axum.completed", error = ?e, "axum task completed with error");
                first_err.get_or_insert(e.into());
            }
            Err(join) => {
                info!(name: "axum.completed", error = ?join, "axum task completed with error");
                first_err.get_or_insert(join.into());
            }
        }
    }

    info!(name: "jobs.completion.awaiting", jobs = job_handles.len(), "awaiting completion of scheduled jobs");
    for handle in job_handles {
        if let Err(join) = handle.await {
            warn!(name: "jobs.completed", error = ?join, "scheduled job task completed with error");
            first_err.get_or_insert(join.into());
        }
    }

    info!(name: "notifications.flush", "waiting for pending notifications");
    notifications.flush().await;

    if let Some(providers) = telemetry {
        providers.shutdown();
    }

    if let Some(err) = first_err {
        Err(err)
    } else {
        Ok(())
    }
}
