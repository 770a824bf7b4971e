pub mod controllers;
pub mod flights;
pub mod roster;

use crate::error::PassError;
use crate::feed::NetworkFeed;
use crate::reconcile::controllers::{ControllerPassReport, ControllerReconciler};
use crate::reconcile::flights::{FlightPassReport, FlightReconciler};
use std::sync::Arc;
use tracing::warn;

/// Fetches one snapshot and runs the flight and controller reconcilers over it
/// concurrently.
pub struct SweepJob {
    feed: Arc<dyn NetworkFeed>,
    flights: FlightReconciler,
    controllers: ControllerReconciler,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub flights: FlightPassReport,
    pub controllers: ControllerPassReport,
}

impl SweepJob {
    pub fn new(
        feed: Arc<dyn NetworkFeed>,
        flights: FlightReconciler,
        controllers: ControllerReconciler,
    ) -> Self {
        Self {
            feed,
            flights,
            controllers,
        }
    }

    /// A fetch failure aborts before anything is written. Once the snapshot is
    /// in hand a failure of one reconciler does not stop the other; the first
    /// error is returned after both have finished.
    pub async fn run(&self) -> Result<SweepReport, PassError> {
        let snapshot = self.feed.fetch_snapshot().await?;

        let (flights, controllers) = tokio::join!(
            self.flights.reconcile(&snapshot),
            self.controllers.reconcile(&snapshot)
        );

        match (flights, controllers) {
            (Ok(flights), Ok(controllers)) => Ok(SweepReport {
                flights,
                controllers,
            }),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(second)) => {
                warn!(error = ?second, "controller pass also failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use crate::feed::{RosterEntry, Snapshot};
    use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
    use shared::vatsim::{Controller, FlightPlan, Pilot};
    use shared::vatusa::Membership;

    pub fn at(time: &str) -> DateTime<Utc> {
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap();
        Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap()
            + TimeDelta::seconds(i64::from(time.num_seconds_from_midnight()))
    }

    pub fn snapshot_at(time: &str, pilots: Vec<Pilot>, controllers: Vec<Controller>) -> Snapshot {
        Snapshot {
            taken_at: at(time),
            pilots,
            controllers,
        }
    }

    pub fn pilot(callsign: &str, latitude: f64, longitude: f64) -> Pilot {
        Pilot {
            cid: 1_200_000,
            name: "Test Pilot".to_string(),
            callsign: callsign.to_string(),
            latitude,
            longitude,
            altitude: 10_000,
            groundspeed: 250,
            heading: 270,
            flight_plan: Some(FlightPlan {
                aircraft_faa: "B738/L".to_string(),
                departure: "KDEN".to_string(),
                arrival: "KSFO".to_string(),
                route: "DCT".to_string(),
            }),
            logon_time: None,
        }
    }

    /// A tower-type connection logged on at `logon`.
    pub fn controller(callsign: &str, cid: i32, logon: &str) -> Controller {
        Controller {
            cid,
            name: "Test Controller".to_string(),
            callsign: callsign.to_string(),
            frequency: "118.300".to_string(),
            facility: 4,
            rating: 5,
            logon_time: Some(at(logon)),
        }
    }

    pub fn roster_entry(
        cid: i32,
        first: &str,
        last: &str,
        membership: Membership,
        facility: &str,
    ) -> RosterEntry {
        RosterEntry {
            cid,
            fname: first.to_string(),
            lname: last.to_string(),
            email: Some(format!("{cid}@example.com")),
            facility: facility.to_string(),
            rating: 5,
            rating_short: "C1".to_string(),
            membership,
            facility_join: Some("2024-03-01T15:50:07+00:00".to_string()),
        }
    }
}
