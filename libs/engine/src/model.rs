//! Domain records shared by the engine components and the store

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{Circle, Position};

/// Tracking session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! registry_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

registry_id!(EmployeeId);
registry_id!(GeofenceId);
registry_id!(AssignmentId);

/// Employee master data, owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub employee_code: String,
    pub is_active: bool,
    /// Check-in must happen inside this circle when set
    pub home: Option<Circle>,
}

/// Circular region of interest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    pub id: GeofenceId,
    pub name: String,
    pub circle: Circle,
}

/// "This employee must visit this geofence on this date"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceAssignment {
    pub id: AssignmentId,
    pub employee_id: EmployeeId,
    pub geofence_id: GeofenceId,
    pub assigned_date: NaiveDate,
}

/// An assignment joined with the geofence it points at
#[derive(Debug, Clone)]
pub struct AssignedGeofence {
    pub assignment: GeofenceAssignment,
    pub geofence: Geofence,
}

/// Recorded Pending→Entered transition of one assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEntry {
    pub assignment_id: AssignmentId,
    pub geofence_id: GeofenceId,
    pub employee_id: EmployeeId,
    pub session_id: SessionId,
    pub entered_at: DateTime<Utc>,
}

/// Status of an assignment; absence of an entry means pending
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GeofenceStatus {
    Pending,
    Entered {
        entered_at: DateTime<Utc>,
        session_id: SessionId,
    },
}

impl GeofenceStatus {
    pub fn is_entered(&self) -> bool {
        matches!(self, GeofenceStatus::Entered { .. })
    }
}

/// Daily target as shown to the employee
#[derive(Debug, Clone)]
pub struct Target {
    pub assignment: GeofenceAssignment,
    pub geofence: Geofence,
    pub status: GeofenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Checkout,
    IdleTimeout,
}

/// References to artifacts captured at check-in; uploads happen elsewhere
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckinArtifacts {
    pub selfie_ref: Option<String>,
    pub odometer_ref: Option<String>,
    /// Reported odometer value, never reconciled against GPS distance
    pub odometer_reading: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutArtifacts {
    pub odometer_ref: Option<String>,
    pub odometer_reading: Option<f64>,
}

/// One check-in-to-checkout tracking period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub employee_id: EmployeeId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub start_position: Position,
    pub checkin: CheckinArtifacts,
    pub last_position: Position,
    pub last_seen_at: DateTime<Utc>,
    /// Sum of haversine legs between accepted samples, in meters
    pub distance_m: f64,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_position: Option<Position>,
    pub checkout: Option<CheckoutArtifacts>,
    pub close_reason: Option<CloseReason>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Date the session is reported under
    pub fn date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    /// End position, or the current position while still active
    pub fn end_so_far(&self) -> Position {
        self.end_position.unwrap_or(self.last_position)
    }

    /// Seconds between check-in and checkout (or the last accepted sample)
    pub fn tracked_seconds(&self) -> i64 {
        let end = self.ended_at.unwrap_or(self.last_seen_at);
        (end - self.started_at).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylinePoint {
    pub session_id: SessionId,
    pub sequence: u32,
    pub position: Position,
    pub recorded_at: DateTime<Utc>,
}

/// Latest known fix of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveLocation {
    pub session_id: SessionId,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub active: bool,
}

/// Per-employee, per-date aggregate derived from sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub employee_id: EmployeeId,
    pub date: NaiveDate,
    pub total_distance_m: f64,
    pub session_count: u32,
    pub tracked_seconds: i64,
    pub geofences_entered: u32,
    pub start: Option<Position>,
    pub end: Option<Position>,
    pub odometer_start: Option<f64>,
    pub odometer_end: Option<f64>,
    /// An active session contributed running values
    pub open: bool,
}

impl DailySummary {
    pub fn empty(employee_id: EmployeeId, date: NaiveDate) -> Self {
        Self {
            employee_id,
            date,
            total_distance_m: 0.0,
            session_count: 0,
            tracked_seconds: 0,
            geofences_entered: 0,
            start: None,
            end: None,
            odometer_start: None,
            odometer_end: None,
            open: false,
        }
    }
}
