//! Persistence seam for the tracking engine
//!
//! The engine owns the rules; a [`TrackingStore`] only keeps records. Two
//! guarantees are required of every implementation because the engine relies
//! on them for correctness under concurrency:
//!
//! - [`TrackingStore::insert_session`] fails with [`StoreError::Conflict`]
//!   when the employee already has an active session, atomically with the
//!   insert.
//! - [`TrackingStore::mark_entered`] is a compare-and-set: it records the
//!   entry and returns `true` only if no entry existed for the assignment.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::model::{
    AssignedGeofence, AssignmentId, Employee, EmployeeId, GeofenceEntry, PolylinePoint, Session,
    SessionId,
};

pub mod memory;

pub use memory::{MemoryStore, WriteOp};

pub type StoreResult<T> = Result<T, StoreError>;

pub trait TrackingStore: Send + Sync + 'static {
    // -- registry (master data, read only)

    fn employee(
        &self,
        id: EmployeeId,
    ) -> impl Future<Output = StoreResult<Option<Employee>>> + Send;

    fn employee_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = StoreResult<Option<Employee>>> + Send;

    /// Assignments of `employee_id` due on `date`, joined with their geofence
    fn assignments_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> impl Future<Output = StoreResult<Vec<AssignedGeofence>>> + Send;

    // -- sessions

    fn insert_session(&self, session: &Session) -> impl Future<Output = StoreResult<()>> + Send;

    fn session(&self, id: SessionId)
    -> impl Future<Output = StoreResult<Option<Session>>> + Send;

    fn active_session(
        &self,
        employee_id: EmployeeId,
    ) -> impl Future<Output = StoreResult<Option<Session>>> + Send;

    /// Persist the mutable fields of an existing session
    fn update_session(&self, session: &Session) -> impl Future<Output = StoreResult<()>> + Send;

    /// All sessions of an employee, newest first
    fn sessions_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> impl Future<Output = StoreResult<Vec<Session>>> + Send;

    /// Sessions with `from <= started_at < to`
    fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Vec<Session>>> + Send;

    /// Active sessions whose last accepted sample is older than `cutoff`
    fn idle_sessions(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<Vec<Session>>> + Send;

    // -- geofence status

    fn mark_entered(&self, entry: &GeofenceEntry)
    -> impl Future<Output = StoreResult<bool>> + Send;

    fn entries_for(
        &self,
        assignment_ids: &[AssignmentId],
    ) -> impl Future<Output = StoreResult<Vec<GeofenceEntry>>> + Send;

    fn entries_for_session(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = StoreResult<Vec<GeofenceEntry>>> + Send;

    // -- polyline

    fn last_point(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = StoreResult<Option<PolylinePoint>>> + Send;

    fn append_point(&self, point: &PolylinePoint) -> impl Future<Output = StoreResult<()>> + Send;

    /// Points of a session ordered by sequence
    fn points(
        &self,
        session_id: SessionId,
    ) -> impl Future<Output = StoreResult<Vec<PolylinePoint>>> + Send;

    /// Delete points recorded before `cutoff`, returning how many were removed
    fn purge_points_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<u64>> + Send;
}
