//! API models for request and response payloads

use chrono::{DateTime, NaiveDate, Utc};
use engine::geo::Position;
use engine::model::{
    AssignmentId, CloseReason, DailySummary, Employee, EmployeeId, GeofenceId, GeofenceStatus,
    PolylinePoint, Session, SessionId, SessionState, Target,
};
use serde::{Deserialize, Serialize};

/// Check-in request. The employee is named by `employee_id` or, failing
/// that, `employee_code`; artifact references point at uploads made before
/// the call.
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub employee_id: Option<i64>,
    pub employee_code: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub selfie_ref: Option<String>,
    pub odometer_ref: Option<String>,
    pub odometer_reading: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub message: String,
    pub session_id: SessionId,
    pub employee_id: EmployeeId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdateRequest {
    pub session_id: SessionId,
    pub lat: f64,
    pub lng: f64,
    /// Device time of the fix; the server clock is used when absent
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub session_id: SessionId,
    pub odometer_ref: Option<String>,
    pub odometer_reading: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub message: String,
    pub session_id: SessionId,
    pub ended_at: Option<DateTime<Utc>>,
    pub distance_m: f64,
    pub distance_km: f64,
}

/// Latest fix of a session, or a "no data" marker
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LiveLocationResponse {
    Fix {
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    },
    NoData {
        status: String,
    },
}

impl LiveLocationResponse {
    pub fn no_data() -> Self {
        LiveLocationResponse::NoData {
            status: "no data".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolylinePointResponse {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<PolylinePoint> for PolylinePointResponse {
    fn from(point: PolylinePoint) -> Self {
        Self {
            lat: point.position.lat,
            lng: point.position.lng,
            timestamp: point.recorded_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetsQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetResponse {
    pub assignment_id: AssignmentId,
    pub geofence_id: GeofenceId,
    pub geofence_name: String,
    pub center: Position,
    pub radius_m: f64,
    pub assigned_date: NaiveDate,
    pub entered: bool,
    pub entered_at: Option<DateTime<Utc>>,
}

impl From<Target> for TargetResponse {
    fn from(target: Target) -> Self {
        let entered_at = match target.status {
            GeofenceStatus::Entered { entered_at, .. } => Some(entered_at),
            GeofenceStatus::Pending => None,
        };
        Self {
            assignment_id: target.assignment.id,
            geofence_id: target.geofence.id,
            geofence_name: target.geofence.name,
            center: target.geofence.circle.center,
            radius_m: target.geofence.circle.radius_m,
            assigned_date: target.assignment.assigned_date,
            entered: entered_at.is_some(),
            entered_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmployeeInfoResponse {
    pub id: EmployeeId,
    pub name: String,
    pub employee_code: String,
    pub is_active: bool,
}

impl From<Employee> for EmployeeInfoResponse {
    fn from(employee: Employee) -> Self {
        Self {
            id: employee.id,
            name: employee.name,
            employee_code: employee.employee_code,
            is_active: employee.is_active,
        }
    }
}

/// Session as reported to the admin dashboard
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub employee_id: EmployeeId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub start: Position,
    pub end: Option<Position>,
    pub last_seen_at: DateTime<Utc>,
    pub distance_m: f64,
    pub distance_km: f64,
    pub selfie_ref: Option<String>,
    pub odometer_start_ref: Option<String>,
    pub odometer_start: Option<f64>,
    pub odometer_end_ref: Option<String>,
    pub odometer_end: Option<f64>,
    pub close_reason: Option<CloseReason>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let (odometer_end_ref, odometer_end) = session
            .checkout
            .map(|c| (c.odometer_ref, c.odometer_reading))
            .unwrap_or((None, None));
        Self {
            session_id: session.id,
            employee_id: session.employee_id,
            state: session.state,
            started_at: session.started_at,
            ended_at: session.ended_at,
            start: session.start_position,
            end: session.end_position,
            last_seen_at: session.last_seen_at,
            distance_m: session.distance_m,
            distance_km: to_km(session.distance_m),
            selfie_ref: session.checkin.selfie_ref,
            odometer_start_ref: session.checkin.odometer_ref,
            odometer_start: session.checkin.odometer_reading,
            odometer_end_ref,
            odometer_end,
            close_reason: session.close_reason,
        }
    }
}

/// Daily summary with the distance also in kilometers
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    pub summary: DailySummary,
    pub distance_km: f64,
}

impl From<DailySummary> for SummaryResponse {
    fn from(summary: DailySummary) -> Self {
        let distance_km = to_km(summary.total_distance_m);
        Self {
            summary,
            distance_km,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub message: String,
    pub rows_deleted: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseIdleResponse {
    pub closed: Vec<SessionId>,
}

/// Meters to kilometers, to the nearest meter
pub fn to_km(meters: f64) -> f64 {
    meters.round() / 1000.0
}
