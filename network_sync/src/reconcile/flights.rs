use crate::boundaries::Point;
use crate::classifier::GeofenceClassifier;
use crate::database::models::FlightRecord;
use crate::error::PassError;
use crate::feed::Snapshot;
use crate::metrics::FlightMetrics;
use crate::store::Store;
use shared::vatsim::Pilot;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlightPassReport {
    pub seen: usize,
    pub saved: usize,
    pub failed: usize,
    pub deleted: u64,
}

pub struct FlightReconciler {
    store: Arc<dyn Store>,
    classifier: GeofenceClassifier,
    max_workers: usize,
    metrics: FlightMetrics,
}

impl FlightReconciler {
    pub fn new(store: Arc<dyn Store>, classifier: GeofenceClassifier, max_workers: usize) -> Self {
        Self {
            store,
            classifier,
            max_workers,
            metrics: FlightMetrics::default(),
        }
    }

    /// Upserts every pilot in `snapshot` under a fresh generation, then deletes
    /// every flight the pass did not touch.
    #[instrument(skip_all, fields(taken_at = %snapshot.taken_at))]
    pub async fn reconcile(&self, snapshot: &Snapshot) -> Result<FlightPassReport, PassError> {
        let generation = Uuid::now_v7();
        let mut report = FlightPassReport {
            seen: snapshot.pilots.len(),
            ..FlightPassReport::default()
        };

        let points = snapshot
            .pilots
            .iter()
            .map(|p| Point::new(p.latitude, p.longitude))
            .collect();
        let facilities = self
            .classifier
            .assign_parallel(points, self.max_workers)
            .await?;
        // Present this pass but not confirmed in the store; never deleted
        let mut unconfirmed: Vec<String> = Vec::new();

        for (pilot, facility) in snapshot.pilots.iter().zip(facilities) {
            let existing = match self.store.find_flight(&pilot.callsign).await {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(error = ?e, callsign = pilot.callsign, "failed to look up flight");
                    report.failed += 1;
                    unconfirmed.push(pilot.callsign.clone());
                    continue;
                }
            };

            let flight = match existing {
                Some(mut flight) => {
                    apply_pilot(&mut flight, pilot);
                    flight.facility = facility;
                    flight.generation = generation;
                    flight.updated_at = snapshot.taken_at;
                    flight
                }
                None => {
                    debug!(callsign = pilot.callsign, ?facility, "new flight");
                    new_flight(pilot, facility, generation, snapshot)
                }
            };

            let saved = self.store.save_flight(&flight).await;
            match saved {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    warn!(error = ?e, callsign = pilot.callsign, "failed to save flight");
                    report.failed += 1;
                    unconfirmed.push(flight.callsign);
                }
            }
        }

        report.deleted = self
            .store
            .delete_flights_outside_generation(generation, &unconfirmed)
            .await?;

        self.metrics.saved.add(report.saved as u64, &[]);
        self.metrics.deleted.add(report.deleted, &[]);
        self.metrics.active.record(report.saved as u64, &[]);
        info!(
            seen = report.seen,
            saved = report.saved,
            failed = report.failed,
            deleted = report.deleted,
            "flight pass complete"
        );

        Ok(report)
    }
}

fn new_flight(
    pilot: &Pilot,
    facility: Option<String>,
    generation: Uuid,
    snapshot: &Snapshot,
) -> FlightRecord {
    let mut flight = FlightRecord {
        callsign: pilot.callsign.clone(),
        cid: pilot.cid,
        facility,
        latitude: 0.0,
        longitude: 0.0,
        altitude: 0,
        heading: 0,
        groundspeed: 0,
        aircraft: String::new(),
        departure: String::new(),
        arrival: String::new(),
        route: String::new(),
        generation,
        updated_at: snapshot.taken_at,
    };
    apply_pilot(&mut flight, pilot);
    flight
}

fn apply_pilot(flight: &mut FlightRecord, pilot: &Pilot) {
    flight.cid = pilot.cid;
    flight.latitude = pilot.latitude;
    flight.longitude = pilot.longitude;
    flight.altitude = pilot.altitude;
    flight.heading = pilot.heading;
    flight.groundspeed = pilot.groundspeed;

    let plan = pilot.flight_plan.clone().unwrap_or_default();
    flight.aircraft = plan.aircraft_faa;
    flight.departure = plan.departure;
    flight.arrival = plan.arrival;
    flight.route = plan.route;
}
