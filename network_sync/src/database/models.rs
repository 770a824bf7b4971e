use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FlightRecord {
    pub callsign: String,
    pub cid: i32,
    pub facility: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub heading: i32,
    pub groundspeed: i32,
    pub aircraft: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
    pub generation: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// A controller currently connected on a tracked position. Keyed by position
/// callsign.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ControllerSession {
    pub position: String,
    pub cid: i32,
    pub name: String,
    pub frequency: String,
    pub facility: i32,
    pub logon_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub generation: Uuid,
}

impl ControllerSession {
    /// Whole seconds between logon and the last pass that observed the session.
    pub fn duration_seconds(&self) -> i64 {
        (self.last_seen - self.logon_time).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ControllerStat {
    pub id: Uuid,
    pub cid: i32,
    pub position: String,
    pub logon_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

impl ControllerStat {
    pub fn from_session(session: &ControllerSession, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            cid: session.cid,
            position: session.position.clone(),
            logon_time: session.logon_time,
            duration_seconds: session.duration_seconds(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "controller_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ControllerType {
    None,
    Home,
    Visitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Certification {
    None,
    Training,
    Solo,
    Certified,
    Cantrain,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RosterUser {
    pub cid: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub operating_initials: Option<String>,
    pub rating: String,
    pub controller_type: ControllerType,
    pub certifications: Json<BTreeMap<String, Certification>>,
    pub region: Option<String>,
    pub division: Option<String>,
    pub subdivision: Option<String>,
    pub roster_join_date: Option<DateTime<Utc>>,
    pub generation: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RosterUser {
    /// A fresh user with every configured certification at `none` and no
    /// controller status.
    pub fn new(
        cid: i32,
        first_name: &str,
        last_name: &str,
        certifications: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            cid,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: None,
            operating_initials: None,
            rating: String::new(),
            controller_type: ControllerType::None,
            certifications: Json(
                certifications
                    .iter()
                    .map(|name| (name.clone(), Certification::None))
                    .collect(),
            ),
            region: None,
            division: None,
            subdivision: None,
            roster_join_date: None,
            generation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_location(&mut self, location: Location) {
        self.region = Some(location.region);
        self.division = Some(location.division);
        self.subdivision = location.subdivision;
    }
}

/// Region, division and subdivision of a network member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub region: String,
    pub division: String,
    pub subdivision: Option<String>,
}

impl Location {
    pub const REGION_AMERICAS: &'static str = "AMAS";
    pub const DIVISION_USA: &'static str = "USA";

    pub fn usa(subdivision: &str) -> Self {
        Self {
            region: Self::REGION_AMERICAS.to_string(),
            division: Self::DIVISION_USA.to_string(),
            subdivision: Some(subdivision.to_string()),
        }
    }

    pub fn is_usa(&self) -> bool {
        self.region == Self::REGION_AMERICAS && self.division == Self::DIVISION_USA
    }
}
