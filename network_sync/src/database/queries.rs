use crate::database::models::{
    ControllerSession, ControllerStat, ControllerType, FlightRecord, Location, RosterUser,
};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

pub async fn get_flight<'e, E>(executor: E, callsign: &str) -> Result<Option<FlightRecord>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, FlightRecord>(
        r"
        SELECT callsign, cid, facility, latitude, longitude, altitude, heading, groundspeed,
               aircraft, departure, arrival, route, generation, updated_at
        FROM flights
        WHERE callsign = $1
        ",
    )
    .bind(callsign)
    .fetch_optional(executor)
    .await
    .map_err(StoreError::from)
}

pub async fn upsert_flight<'e, E>(executor: E, flight: &FlightRecord) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO flights (
            callsign,
            cid,
            facility,
            latitude,
            longitude,
            altitude,
            heading,
            groundspeed,
            aircraft,
            departure,
            arrival,
            route,
            generation,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (callsign) DO UPDATE SET
            cid = EXCLUDED.cid,
            facility = EXCLUDED.facility,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            altitude = EXCLUDED.altitude,
            heading = EXCLUDED.heading,
            groundspeed = EXCLUDED.groundspeed,
            aircraft = EXCLUDED.aircraft,
            departure = EXCLUDED.departure,
            arrival = EXCLUDED.arrival,
            route = EXCLUDED.route,
            generation = EXCLUDED.generation,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(&flight.callsign)
    .bind(flight.cid)
    .bind(&flight.facility)
    .bind(flight.latitude)
    .bind(flight.longitude)
    .bind(flight.altitude)
    .bind(flight.heading)
    .bind(flight.groundspeed)
    .bind(&flight.aircraft)
    .bind(&flight.departure)
    .bind(&flight.arrival)
    .bind(&flight.route)
    .bind(flight.generation)
    .bind(flight.updated_at)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(StoreError::from)
}

pub async fn delete_flights_not_in_generation<'e, E>(
    executor: E,
    generation: Uuid,
    keep: &[String],
) -> Result<u64, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("DELETE FROM flights WHERE generation <> $1 AND callsign <> ALL($2)")
        .bind(generation)
        .bind(keep)
        .execute(executor)
        .await
        .map(|r| r.rows_affected())
        .map_err(StoreError::from)
}

pub async fn get_online_controller<'e, E>(
    executor: E,
    position: &str,
) -> Result<Option<ControllerSession>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ControllerSession>(
        r"
        SELECT position, cid, name, frequency, facility, logon_time, last_seen, generation
        FROM online_controllers
        WHERE position = $1
        ",
    )
    .bind(position)
    .fetch_optional(executor)
    .await
    .map_err(StoreError::from)
}

/// `logon_time` is only written on insert; an existing session keeps the logon
/// it was created with.
pub async fn upsert_online_controller<'e, E>(
    executor: E,
    session: &ControllerSession,
) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO online_controllers (
            position,
            cid,
            name,
            frequency,
            facility,
            logon_time,
            last_seen,
            generation
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (position) DO UPDATE SET
            cid = EXCLUDED.cid,
            name = EXCLUDED.name,
            frequency = EXCLUDED.frequency,
            facility = EXCLUDED.facility,
            last_seen = EXCLUDED.last_seen,
            generation = EXCLUDED.generation
        ",
    )
    .bind(&session.position)
    .bind(session.cid)
    .bind(&session.name)
    .bind(&session.frequency)
    .bind(session.facility)
    .bind(session.logon_time)
    .bind(session.last_seen)
    .bind(session.generation)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(StoreError::from)
}

pub async fn get_online_controllers_not_in_generation<'e, E>(
    executor: E,
    generation: Uuid,
    keep: &[String],
) -> Result<Vec<ControllerSession>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ControllerSession>(
        r"
        SELECT position, cid, name, frequency, facility, logon_time, last_seen, generation
        FROM online_controllers
        WHERE generation <> $1
          AND position <> ALL($2)
        ",
    )
    .bind(generation)
    .bind(keep)
    .fetch_all(executor)
    .await
    .map_err(StoreError::from)
}

/// Returns whether a new stat row was written. A stat for the same position
/// and logon already present is left alone.
pub async fn insert_controller_stat<'e, E>(
    executor: &mut E,
    stat: &ControllerStat,
) -> Result<bool, StoreError>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO controller_stats (id, cid, position, logon_time, duration_seconds, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (position, logon_time) DO NOTHING
        ",
    )
    .bind(stat.id)
    .bind(stat.cid)
    .bind(&stat.position)
    .bind(stat.logon_time)
    .bind(stat.duration_seconds)
    .bind(stat.created_at)
    .execute(&mut *executor)
    .await
    .map(|r| r.rows_affected() > 0)
    .map_err(StoreError::from)
}

pub async fn delete_online_controller<'e, E>(
    executor: &mut E,
    position: &str,
) -> Result<(), StoreError>
where
    for<'c> &'c mut E: Executor<'c, Database = Postgres>,
{
    sqlx::query("DELETE FROM online_controllers WHERE position = $1")
        .bind(position)
        .execute(&mut *executor)
        .await
        .map(|_| ())
        .map_err(StoreError::from)
}

const USER_COLUMNS: &str = r"
    cid, first_name, last_name, email, operating_initials, rating, controller_type,
    certifications, region, division, subdivision, roster_join_date, generation,
    created_at, updated_at
";

pub async fn get_user<'e, E>(executor: E, cid: i32) -> Result<Option<RosterUser>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, RosterUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE cid = $1"))
        .bind(cid)
        .fetch_optional(executor)
        .await
        .map_err(StoreError::from)
}

pub async fn get_user_by_initials<'e, E>(
    executor: E,
    initials: &str,
) -> Result<Option<RosterUser>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, RosterUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE operating_initials = $1"
    ))
    .bind(initials)
    .fetch_optional(executor)
    .await
    .map_err(StoreError::from)
}

pub async fn upsert_user<'e, E>(executor: E, user: &RosterUser) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO users (
            cid,
            first_name,
            last_name,
            email,
            operating_initials,
            rating,
            controller_type,
            certifications,
            region,
            division,
            subdivision,
            roster_join_date,
            generation,
            created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (cid) DO UPDATE SET
            first_name = EXCLUDED.first_name,
            last_name = EXCLUDED.last_name,
            email = EXCLUDED.email,
            operating_initials = EXCLUDED.operating_initials,
            rating = EXCLUDED.rating,
            controller_type = EXCLUDED.controller_type,
            certifications = EXCLUDED.certifications,
            region = EXCLUDED.region,
            division = EXCLUDED.division,
            subdivision = EXCLUDED.subdivision,
            roster_join_date = EXCLUDED.roster_join_date,
            generation = EXCLUDED.generation,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(user.cid)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.operating_initials)
    .bind(&user.rating)
    .bind(user.controller_type)
    .bind(&user.certifications)
    .bind(&user.region)
    .bind(&user.division)
    .bind(&user.subdivision)
    .bind(user.roster_join_date)
    .bind(user.generation)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(executor)
    .await
    .map(|_| ())
    .map_err(StoreError::from)
}

pub async fn soft_remove_users_not_in_generation<'e, E>(
    executor: E,
    generation: Uuid,
    keep: &[i32],
    now: DateTime<Utc>,
) -> Result<u64, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r"
        UPDATE users
        SET controller_type = $1,
            operating_initials = NULL,
            generation = $2,
            updated_at = $3
        WHERE generation IS DISTINCT FROM $2
          AND cid <> ALL($4)
        ",
    )
    .bind(ControllerType::None)
    .bind(generation)
    .bind(now)
    .bind(keep)
    .execute(executor)
    .await
    .map(|r| r.rows_affected())
    .map_err(StoreError::from)
}

pub async fn get_foreign_visitors<'e, E>(executor: E) -> Result<Vec<RosterUser>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, RosterUser>(&format!(
        r"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE controller_type = $1
          AND NOT (region IS NOT DISTINCT FROM $2 AND division IS NOT DISTINCT FROM $3)
        "
    ))
    .bind(ControllerType::Visitor)
    .bind(Location::REGION_AMERICAS)
    .bind(Location::DIVISION_USA)
    .fetch_all(executor)
    .await
    .map_err(StoreError::from)
}

pub async fn get_users_missing_initials<'e, E>(executor: E) -> Result<Vec<RosterUser>, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, RosterUser>(&format!(
        r"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE controller_type <> $1
          AND operating_initials IS NULL
        ORDER BY cid
        "
    ))
    .bind(ControllerType::None)
    .fetch_all(executor)
    .await
    .map_err(StoreError::from)
}
