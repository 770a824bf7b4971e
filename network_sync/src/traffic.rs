use crate::boundaries::Point;
use crate::error::PassError;
use crate::feed::{NetworkFeed, Snapshot};
use crate::notify::{Channel, Message, Notifier, notify};
use regex::Regex;
use shared::TrafficConfig;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const EARTH_RADIUS_M: f64 = 6_371e3;
pub const METERS_PER_NM: f64 = 1_852.0;

/// Great-circle distance in metres.
pub fn haversine_meters(a: Point, b: Point) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

struct WatchedAirport {
    icao: String,
    location: Point,
    threshold: u32,
    covered_by: Vec<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnstaffedAirport {
    pub icao: String,
    pub pilots: u32,
}

pub struct TrafficMonitor {
    feed: Arc<dyn NetworkFeed>,
    notifier: Arc<dyn Notifier>,
    airports: Vec<WatchedAirport>,
    max_distance_m: f64,
}

impl TrafficMonitor {
    /// Compiles every `covered_by` pattern up front so a bad pattern fails at
    /// startup rather than on the first check.
    pub fn new(
        config: &TrafficConfig,
        feed: Arc<dyn NetworkFeed>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, regex::Error> {
        let airports = config
            .airports
            .iter()
            .map(|entry| {
                Ok(WatchedAirport {
                    icao: entry.icao.clone(),
                    location: Point::new(entry.latitude, entry.longitude),
                    threshold: entry.threshold,
                    covered_by: entry
                        .covered_by
                        .iter()
                        .map(|p| Regex::new(p))
                        .collect::<Result<_, _>>()?,
                })
            })
            .collect::<Result<_, regex::Error>>()?;

        Ok(Self {
            feed,
            notifier,
            airports,
            max_distance_m: config.max_distance_nm * METERS_PER_NM,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.airports.is_empty()
    }

    /// Airports, in configuration order, with at least their threshold of
    /// pilots nearby and no controller matching any of their coverage patterns.
    pub fn check(&self, snapshot: &Snapshot) -> Vec<UnstaffedAirport> {
        let mut unstaffed = Vec::new();

        for airport in &self.airports {
            let pilots = snapshot
                .pilots
                .iter()
                .filter(|p| {
                    haversine_meters(Point::new(p.latitude, p.longitude), airport.location)
                        <= self.max_distance_m
                })
                .count();
            let pilots = u32::try_from(pilots).unwrap_or(u32::MAX);
            if pilots == 0 || pilots < airport.threshold {
                continue;
            }

            let covered = snapshot.controllers.iter().any(|c| {
                airport
                    .covered_by
                    .iter()
                    .any(|re| re.is_match(&c.callsign))
            });
            if covered {
                debug!(icao = airport.icao, pilots, "traffic is covered");
                continue;
            }

            unstaffed.push(UnstaffedAirport {
                icao: airport.icao.clone(),
                pilots,
            });
        }

        unstaffed
    }

    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<Vec<UnstaffedAirport>, PassError> {
        if self.airports.is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.feed.fetch_snapshot().await?;
        let unstaffed = self.check(&snapshot);
        info!(unstaffed = unstaffed.len(), "checked traffic for unstaffed airports");

        if !unstaffed.is_empty() {
            notify(
                self.notifier.as_ref(),
                Channel::Traffic,
                Message::text(alert_message(&unstaffed)),
            )
            .await;
        }

        Ok(unstaffed)
    }
}

pub fn alert_message(unstaffed: &[UnstaffedAirport]) -> String {
    let mut message = String::from("**Unstaffed traffic alerts**\n\n");
    for airport in unstaffed {
        let _ = writeln!(message, "- {}: {} pilots", airport.icao, airport.pilots);
    }
    message
}
