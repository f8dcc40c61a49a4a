//! PostgreSQL implementation of the tracking store

use chrono::{DateTime, NaiveDate, Utc};
use engine::StoreError;
use engine::geo::{Circle, Position};
use engine::model::{
    AssignedGeofence, AssignmentId, CheckinArtifacts, CheckoutArtifacts, CloseReason, Employee,
    EmployeeId, Geofence, GeofenceAssignment, GeofenceEntry, GeofenceId, PolylinePoint, Session,
    SessionId, SessionState,
};
use engine::store::{StoreResult, TrackingStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const SESSION_COLUMNS: &str = "id, employee_id, state, started_at, start_lat, start_lng, \
     selfie_ref, odometer_start_ref, odometer_start_reading, last_lat, last_lng, last_seen_at, \
     distance_m, ended_at, end_lat, end_lng, checked_out, odometer_end_ref, odometer_end_reading, \
     close_reason";

const EMPLOYEE_COLUMNS: &str =
    "id, name, employee_code, is_active, home_lat, home_lng, home_radius_m";

const ENTRY_COLUMNS: &str = "assignment_id, geofence_id, employee_id, session_id, entered_at";

/// Store backed by the tables created in `migrations/`
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Classify a sqlx failure for the engine's retry logic
fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::Active => "active",
        SessionState::Closed => "closed",
    }
}

fn reason_name(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Checkout => "checkout",
        CloseReason::IdleTimeout => "idle_timeout",
    }
}

fn employee_from_row(row: &PgRow) -> Result<Employee, sqlx::Error> {
    let home_lat: Option<f64> = row.try_get("home_lat")?;
    let home_lng: Option<f64> = row.try_get("home_lng")?;
    let home_radius_m: Option<f64> = row.try_get("home_radius_m")?;
    let home = match (home_lat, home_lng, home_radius_m) {
        (Some(lat), Some(lng), Some(radius_m)) => Some(Circle {
            center: Position { lat, lng },
            radius_m,
        }),
        _ => None,
    };

    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        name: row.try_get("name")?,
        employee_code: row.try_get("employee_code")?,
        is_active: row.try_get("is_active")?,
        home,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, sqlx::Error> {
    let state = match row.try_get::<String, _>("state")?.as_str() {
        "active" => SessionState::Active,
        _ => SessionState::Closed,
    };
    let close_reason = row
        .try_get::<Option<String>, _>("close_reason")?
        .map(|reason| match reason.as_str() {
            "idle_timeout" => CloseReason::IdleTimeout,
            _ => CloseReason::Checkout,
        });
    let end_lat: Option<f64> = row.try_get("end_lat")?;
    let end_lng: Option<f64> = row.try_get("end_lng")?;
    let checkout = if row.try_get::<bool, _>("checked_out")? {
        Some(CheckoutArtifacts {
            odometer_ref: row.try_get("odometer_end_ref")?,
            odometer_reading: row.try_get("odometer_end_reading")?,
        })
    } else {
        None
    };

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        state,
        started_at: row.try_get("started_at")?,
        start_position: Position {
            lat: row.try_get("start_lat")?,
            lng: row.try_get("start_lng")?,
        },
        checkin: CheckinArtifacts {
            selfie_ref: row.try_get("selfie_ref")?,
            odometer_ref: row.try_get("odometer_start_ref")?,
            odometer_reading: row.try_get("odometer_start_reading")?,
        },
        last_position: Position {
            lat: row.try_get("last_lat")?,
            lng: row.try_get("last_lng")?,
        },
        last_seen_at: row.try_get("last_seen_at")?,
        distance_m: row.try_get("distance_m")?,
        ended_at: row.try_get("ended_at")?,
        end_position: end_lat.zip(end_lng).map(|(lat, lng)| Position { lat, lng }),
        checkout,
        close_reason,
    })
}

fn entry_from_row(row: &PgRow) -> Result<GeofenceEntry, sqlx::Error> {
    Ok(GeofenceEntry {
        assignment_id: AssignmentId(row.try_get("assignment_id")?),
        geofence_id: GeofenceId(row.try_get("geofence_id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        session_id: SessionId(row.try_get("session_id")?),
        entered_at: row.try_get("entered_at")?,
    })
}

fn point_from_row(row: &PgRow) -> Result<PolylinePoint, sqlx::Error> {
    let sequence: i32 = row.try_get("sequence")?;
    Ok(PolylinePoint {
        session_id: SessionId(row.try_get("session_id")?),
        sequence: sequence.max(0) as u32,
        position: Position {
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
        },
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn sessions_from_rows(rows: &[PgRow]) -> StoreResult<Vec<Session>> {
    rows.iter()
        .map(|row| session_from_row(row).map_err(store_error))
        .collect()
}

impl TrackingStore for PgStore {
    async fn employee(&self, id: EmployeeId) -> StoreResult<Option<Employee>> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref()
            .map(employee_from_row)
            .transpose()
            .map_err(store_error)
    }

    async fn employee_by_code(&self, code: &str) -> StoreResult<Option<Employee>> {
        let row = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE employee_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref()
            .map(employee_from_row)
            .transpose()
            .map_err(store_error)
    }

    async fn assignments_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> StoreResult<Vec<AssignedGeofence>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.employee_id, a.geofence_id, a.assigned_date,
                   g.name, g.center_lat, g.center_lng, g.radius_m
            FROM geofence_assignments a
            JOIN geofences g ON g.id = a.geofence_id
            WHERE a.employee_id = $1 AND a.assigned_date = $2
            ORDER BY a.id
            "#,
        )
        .bind(employee_id.0)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| -> Result<AssignedGeofence, sqlx::Error> {
                let geofence_id = GeofenceId(row.try_get("geofence_id")?);
                Ok(AssignedGeofence {
                    assignment: GeofenceAssignment {
                        id: AssignmentId(row.try_get("id")?),
                        employee_id: EmployeeId(row.try_get("employee_id")?),
                        geofence_id,
                        assigned_date: row.try_get("assigned_date")?,
                    },
                    geofence: Geofence {
                        id: geofence_id,
                        name: row.try_get("name")?,
                        circle: Circle {
                            center: Position {
                                lat: row.try_get("center_lat")?,
                                lng: row.try_get("center_lng")?,
                            },
                            radius_m: row.try_get("radius_m")?,
                        },
                    },
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_error)
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking_sessions
                (id, employee_id, state, started_at, start_lat, start_lng,
                 selfie_ref, odometer_start_ref, odometer_start_reading,
                 last_lat, last_lng, last_seen_at, distance_m)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.id.0)
        .bind(session.employee_id.0)
        .bind(state_name(session.state))
        .bind(session.started_at)
        .bind(session.start_position.lat)
        .bind(session.start_position.lng)
        .bind(&session.checkin.selfie_ref)
        .bind(&session.checkin.odometer_ref)
        .bind(session.checkin.odometer_reading)
        .bind(session.last_position.lat)
        .bind(session.last_position.lng)
        .bind(session.last_seen_at)
        .bind(session.distance_m)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(store_error)
    }

    async fn active_session(&self, employee_id: EmployeeId) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions
             WHERE employee_id = $1 AND state = 'active'"
        ))
        .bind(employee_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref()
            .map(session_from_row)
            .transpose()
            .map_err(store_error)
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let (odometer_end_ref, odometer_end_reading) = match &session.checkout {
            Some(checkout) => (checkout.odometer_ref.clone(), checkout.odometer_reading),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE tracking_sessions SET
                state = $2,
                last_lat = $3,
                last_lng = $4,
                last_seen_at = $5,
                distance_m = $6,
                ended_at = $7,
                end_lat = $8,
                end_lng = $9,
                checked_out = $10,
                odometer_end_ref = $11,
                odometer_end_reading = $12,
                close_reason = $13
            WHERE id = $1
            "#,
        )
        .bind(session.id.0)
        .bind(state_name(session.state))
        .bind(session.last_position.lat)
        .bind(session.last_position.lng)
        .bind(session.last_seen_at)
        .bind(session.distance_m)
        .bind(session.ended_at)
        .bind(session.end_position.map(|p| p.lat))
        .bind(session.end_position.map(|p| p.lng))
        .bind(session.checkout.is_some())
        .bind(odometer_end_ref)
        .bind(odometer_end_reading)
        .bind(session.close_reason.map(reason_name))
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!(
                "session {} does not exist",
                session.id
            )));
        }
        Ok(())
    }

    async fn sessions_for_employee(&self, employee_id: EmployeeId) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions
             WHERE employee_id = $1 ORDER BY started_at DESC"
        ))
        .bind(employee_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        sessions_from_rows(&rows)
    }

    async fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions
             WHERE started_at >= $1 AND started_at < $2 ORDER BY started_at"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        sessions_from_rows(&rows)
    }

    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM tracking_sessions
             WHERE state = 'active' AND last_seen_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        sessions_from_rows(&rows)
    }

    async fn mark_entered(&self, entry: &GeofenceEntry) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO geofence_entries
                (assignment_id, geofence_id, employee_id, session_id, entered_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (assignment_id) DO NOTHING
            "#,
        )
        .bind(entry.assignment_id.0)
        .bind(entry.geofence_id.0)
        .bind(entry.employee_id.0)
        .bind(entry.session_id.0)
        .bind(entry.entered_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn entries_for(&self, assignment_ids: &[AssignmentId]) -> StoreResult<Vec<GeofenceEntry>> {
        if assignment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = assignment_ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM geofence_entries WHERE assignment_id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| entry_from_row(row).map_err(store_error))
            .collect()
    }

    async fn entries_for_session(&self, session_id: SessionId) -> StoreResult<Vec<GeofenceEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM geofence_entries
             WHERE session_id = $1 ORDER BY entered_at"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| entry_from_row(row).map_err(store_error))
            .collect()
    }

    async fn last_point(&self, session_id: SessionId) -> StoreResult<Option<PolylinePoint>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, sequence, lat, lng, recorded_at
            FROM polyline_points
            WHERE session_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(session_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref()
            .map(point_from_row)
            .transpose()
            .map_err(store_error)
    }

    async fn append_point(&self, point: &PolylinePoint) -> StoreResult<()> {
        let sequence = i32::try_from(point.sequence).map_err(|_| {
            StoreError::Backend(format!("polyline sequence {} out of range", point.sequence))
        })?;

        sqlx::query(
            r#"
            INSERT INTO polyline_points (session_id, sequence, lat, lng, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(point.session_id.0)
        .bind(sequence)
        .bind(point.position.lat)
        .bind(point.position.lng)
        .bind(point.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn points(&self, session_id: SessionId) -> StoreResult<Vec<PolylinePoint>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, sequence, lat, lng, recorded_at
            FROM polyline_points
            WHERE session_id = $1
            ORDER BY sequence
            "#,
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|row| point_from_row(row).map_err(store_error))
            .collect()
    }

    async fn purge_points_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM polyline_points WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::database::{DatabaseConfig, init_pool, run_migrations};
    use uuid::Uuid;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(store_error(sqlx::Error::PoolClosed).is_transient());
        assert!(!store_error(sqlx::Error::RowNotFound).is_transient());
    }

    async fn seeded_store() -> Result<(PgStore, EmployeeId), Box<dyn std::error::Error>> {
        let pool = init_pool(&DatabaseConfig::from_env()?).await?;
        run_migrations(&pool).await?;

        let code = format!("TEST-{}", Uuid::new_v4());
        let row = sqlx::query(
            "INSERT INTO employees (name, employee_code) VALUES ('Test', $1) RETURNING id",
        )
        .bind(&code)
        .fetch_one(&pool)
        .await?;
        Ok((PgStore::new(pool), EmployeeId(row.get("id"))))
    }

    fn session_for(employee_id: EmployeeId) -> Session {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let position = Position {
            lat: 17.452,
            lng: 78.3974,
        };
        Session {
            id: SessionId::new(),
            employee_id,
            state: SessionState::Active,
            started_at: at,
            start_position: position,
            checkin: CheckinArtifacts::default(),
            last_position: position,
            last_seen_at: at,
            distance_m: 0.0,
            ended_at: None,
            end_position: None,
            checkout: None,
            close_reason: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_second_active_session_conflicts() -> Result<(), Box<dyn std::error::Error>> {
        let (store, employee_id) = seeded_store().await?;

        let first = session_for(employee_id);
        store.insert_session(&first).await?;
        let second = session_for(employee_id);
        assert!(matches!(
            store.insert_session(&second).await,
            Err(StoreError::Conflict(_))
        ));

        let mut closed = first.clone();
        closed.state = SessionState::Closed;
        closed.ended_at = Some(first.started_at);
        closed.end_position = Some(first.last_position);
        closed.checkout = Some(CheckoutArtifacts::default());
        closed.close_reason = Some(CloseReason::Checkout);
        store.update_session(&closed).await?;

        store.insert_session(&second).await?;
        let reloaded = store.session(first.id).await?.expect("session stored");
        assert_eq!(reloaded, closed);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_polyline_sequence_is_unique() -> Result<(), Box<dyn std::error::Error>> {
        let (store, employee_id) = seeded_store().await?;
        let session = session_for(employee_id);
        store.insert_session(&session).await?;

        let point = PolylinePoint {
            session_id: session.id,
            sequence: 0,
            position: session.start_position,
            recorded_at: session.started_at,
        };
        store.append_point(&point).await?;
        assert!(matches!(
            store.append_point(&point).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.last_point(session.id).await?, Some(point));
        Ok(())
    }
}
