use super::Store;
use crate::database::models::{
    ControllerSession, ControllerStat, ControllerType, FlightRecord, Location, RosterUser,
};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    flights: BTreeMap<String, FlightRecord>,
    sessions: BTreeMap<String, ControllerSession>,
    stats: Vec<ControllerStat>,
    users: BTreeMap<i32, RosterUser>,
}

/// In-memory [`Store`] with failure injection. Reads and writes are keyed by
/// callsign, position or cid; generation sweeps by table name (`flights`,
/// `online_controllers`, `users`).
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing_keys: Mutex<HashSet<String>>,
    failing_lookups: Mutex<HashSet<String>>,
    failing_sweeps: Mutex<HashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_for(&self, key: impl ToString) {
        self.failing_keys.lock().insert(key.to_string());
    }

    pub fn fail_lookups_for(&self, key: impl ToString) {
        self.failing_lookups.lock().insert(key.to_string());
    }

    pub fn fail_sweep_of(&self, table: &'static str) {
        self.failing_sweeps.lock().insert(table);
    }

    pub fn clear_failures(&self) {
        self.failing_keys.lock().clear();
        self.failing_lookups.lock().clear();
        self.failing_sweeps.lock().clear();
    }

    pub fn flights(&self) -> Vec<FlightRecord> {
        self.tables.lock().flights.values().cloned().collect()
    }

    pub fn sessions(&self) -> Vec<ControllerSession> {
        self.tables.lock().sessions.values().cloned().collect()
    }

    pub fn stats(&self) -> Vec<ControllerStat> {
        self.tables.lock().stats.clone()
    }

    pub fn users(&self) -> Vec<RosterUser> {
        self.tables.lock().users.values().cloned().collect()
    }

    pub fn insert_user(&self, user: RosterUser) {
        self.tables.lock().users.insert(user.cid, user);
    }

    pub fn insert_flight(&self, flight: FlightRecord) {
        self.tables
            .lock()
            .flights
            .insert(flight.callsign.clone(), flight);
    }

    fn check_write(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_keys.lock().contains(key) {
            return Err(injected(key));
        }
        Ok(())
    }

    fn check_sweep(&self, table: &str) -> Result<(), StoreError> {
        if self.failing_sweeps.lock().contains(table) {
            return Err(injected(table));
        }
        Ok(())
    }

    fn check_lookup(&self, key: &str) -> Result<(), StoreError> {
        if self.failing_lookups.lock().contains(key) {
            return Err(injected(key));
        }
        Ok(())
    }
}

fn injected(key: &str) -> StoreError {
    StoreError::Db(sqlx::Error::Protocol(format!("injected failure for {key}")))
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_flight(&self, callsign: &str) -> Result<Option<FlightRecord>, StoreError> {
        self.check_lookup(callsign)?;
        Ok(self.tables.lock().flights.get(callsign).cloned())
    }

    async fn save_flight(&self, flight: &FlightRecord) -> Result<(), StoreError> {
        self.check_write(&flight.callsign)?;
        self.insert_flight(flight.clone());
        Ok(())
    }

    async fn delete_flights_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        self.check_sweep("flights")?;
        let mut tables = self.tables.lock();
        let before = tables.flights.len();
        tables
            .flights
            .retain(|callsign, f| f.generation == generation || keep.contains(callsign));
        Ok((before - tables.flights.len()) as u64)
    }

    async fn find_controller_session(
        &self,
        position: &str,
    ) -> Result<Option<ControllerSession>, StoreError> {
        self.check_lookup(position)?;
        Ok(self.tables.lock().sessions.get(position).cloned())
    }

    async fn save_controller_session(&self, session: &ControllerSession) -> Result<(), StoreError> {
        self.check_write(&session.position)?;
        self.tables
            .lock()
            .sessions
            .insert(session.position.clone(), session.clone());
        Ok(())
    }

    async fn controller_sessions_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<Vec<ControllerSession>, StoreError> {
        self.check_sweep("online_controllers")?;
        Ok(self
            .tables
            .lock()
            .sessions
            .values()
            .filter(|s| s.generation != generation && !keep.contains(&s.position))
            .cloned()
            .collect())
    }

    async fn retire_controller_session(
        &self,
        session: &ControllerSession,
        stat: &ControllerStat,
    ) -> Result<(), StoreError> {
        self.check_write(&session.position)?;
        let mut tables = self.tables.lock();
        let duplicate = tables
            .stats
            .iter()
            .any(|s| s.position == stat.position && s.logon_time == stat.logon_time);
        if !duplicate {
            tables.stats.push(stat.clone());
        }
        tables.sessions.remove(&session.position);
        Ok(())
    }

    async fn find_user(&self, cid: i32) -> Result<Option<RosterUser>, StoreError> {
        self.check_lookup(&cid.to_string())?;
        Ok(self.tables.lock().users.get(&cid).cloned())
    }

    async fn find_user_by_initials(
        &self,
        initials: &str,
    ) -> Result<Option<RosterUser>, StoreError> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .find(|u| u.operating_initials.as_deref() == Some(initials))
            .cloned())
    }

    async fn save_user(&self, user: &RosterUser) -> Result<(), StoreError> {
        self.check_write(&user.cid.to_string())?;
        self.insert_user(user.clone());
        Ok(())
    }

    async fn soft_remove_users_outside_generation(
        &self,
        generation: Uuid,
        keep: &[i32],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_sweep("users")?;
        let mut changed = 0;
        for user in self.tables.lock().users.values_mut() {
            if user.generation != Some(generation) && !keep.contains(&user.cid) {
                user.controller_type = ControllerType::None;
                user.operating_initials = None;
                user.generation = Some(generation);
                user.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn foreign_visitors(&self) -> Result<Vec<RosterUser>, StoreError> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .filter(|u| {
                u.controller_type == ControllerType::Visitor
                    && !(u.region.as_deref() == Some(Location::REGION_AMERICAS)
                        && u.division.as_deref() == Some(Location::DIVISION_USA))
            })
            .cloned()
            .collect())
    }

    async fn users_missing_initials(&self) -> Result<Vec<RosterUser>, StoreError> {
        Ok(self
            .tables
            .lock()
            .users
            .values()
            .filter(|u| {
                u.controller_type != ControllerType::None && u.operating_initials.is_none()
            })
            .cloned()
            .collect())
    }
}
