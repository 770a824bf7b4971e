//! Persistence seam for the reconcilers. Production uses [`crate::database::PgStore`];
//! tests use the in-memory store.

#[cfg(test)]
pub mod memory;

use crate::database::models::{ControllerSession, ControllerStat, FlightRecord, RosterUser};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn find_flight(&self, callsign: &str) -> Result<Option<FlightRecord>, StoreError>;

    async fn save_flight(&self, flight: &FlightRecord) -> Result<(), StoreError>;

    /// Deletes every flight not stamped with `generation` whose callsign is not
    /// in `keep`, returning how many were removed.
    async fn delete_flights_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError>;

    async fn find_controller_session(
        &self,
        position: &str,
    ) -> Result<Option<ControllerSession>, StoreError>;

    async fn save_controller_session(&self, session: &ControllerSession) -> Result<(), StoreError>;

    /// Sessions not stamped with `generation`, leaving out the positions in
    /// `keep`.
    async fn controller_sessions_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<Vec<ControllerSession>, StoreError>;

    /// Records `stat` and deletes `session` as one unit. Either both happen or
    /// neither does.
    async fn retire_controller_session(
        &self,
        session: &ControllerSession,
        stat: &ControllerStat,
    ) -> Result<(), StoreError>;

    async fn find_user(&self, cid: i32) -> Result<Option<RosterUser>, StoreError>;

    async fn find_user_by_initials(&self, initials: &str)
    -> Result<Option<RosterUser>, StoreError>;

    /// Inserts or updates the user keyed by `cid`.
    async fn save_user(&self, user: &RosterUser) -> Result<(), StoreError>;

    /// Sets `controller_type = none`, releases operating initials and stamps
    /// `generation` on every user not already carrying it, except the cids in
    /// `keep`. Returns the number of users changed.
    async fn soft_remove_users_outside_generation(
        &self,
        generation: Uuid,
        keep: &[i32],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Visitors whose recorded geography is not AMAS/USA.
    async fn foreign_visitors(&self) -> Result<Vec<RosterUser>, StoreError>;

    /// Home and visiting controllers without operating initials.
    async fn users_missing_initials(&self) -> Result<Vec<RosterUser>, StoreError>;
}
