pub mod models;
pub mod queries;

use crate::database::models::{ControllerSession, ControllerStat, FlightRecord, RosterUser};
use crate::error::StoreError;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_flight(&self, callsign: &str) -> Result<Option<FlightRecord>, StoreError> {
        queries::get_flight(&self.pool, callsign).await
    }

    async fn save_flight(&self, flight: &FlightRecord) -> Result<(), StoreError> {
        queries::upsert_flight(&self.pool, flight).await
    }

    async fn delete_flights_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        queries::delete_flights_not_in_generation(&self.pool, generation, keep).await
    }

    async fn find_controller_session(
        &self,
        position: &str,
    ) -> Result<Option<ControllerSession>, StoreError> {
        queries::get_online_controller(&self.pool, position).await
    }

    async fn save_controller_session(&self, session: &ControllerSession) -> Result<(), StoreError> {
        queries::upsert_online_controller(&self.pool, session).await
    }

    async fn controller_sessions_outside_generation(
        &self,
        generation: Uuid,
        keep: &[String],
    ) -> Result<Vec<ControllerSession>, StoreError> {
        queries::get_online_controllers_not_in_generation(&self.pool, generation, keep).await
    }

    async fn retire_controller_session(
        &self,
        session: &ControllerSession,
        stat: &ControllerStat,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = queries::insert_controller_stat(&mut *tx, stat).await?;
        queries::delete_online_controller(&mut *tx, &session.position).await?;
        tx.commit().await?;

        if !inserted {
            debug!(
                position = session.position,
                logon_time = %session.logon_time,
                "stat already recorded for session, only deleted session"
            );
        }
        Ok(())
    }

    async fn find_user(&self, cid: i32) -> Result<Option<RosterUser>, StoreError> {
        queries::get_user(&self.pool, cid).await
    }

    async fn find_user_by_initials(
        &self,
        initials: &str,
    ) -> Result<Option<RosterUser>, StoreError> {
        queries::get_user_by_initials(&self.pool, initials).await
    }

    async fn save_user(&self, user: &RosterUser) -> Result<(), StoreError> {
        queries::upsert_user(&self.pool, user).await
    }

    async fn soft_remove_users_outside_generation(
        &self,
        generation: Uuid,
        keep: &[i32],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        queries::soft_remove_users_not_in_generation(&self.pool, generation, keep, now).await
    }

    async fn foreign_visitors(&self) -> Result<Vec<RosterUser>, StoreError> {
        queries::get_foreign_visitors(&self.pool).await
    }

    async fn users_missing_initials(&self) -> Result<Vec<RosterUser>, StoreError> {
        queries::get_users_missing_initials(&self.pool).await
    }
}
