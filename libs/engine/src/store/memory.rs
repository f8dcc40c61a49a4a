//! In-process store used by tests and single-node deployments

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::geo::Circle;
use crate::model::{
    AssignedGeofence, AssignmentId, Employee, EmployeeId, Geofence, GeofenceAssignment,
    GeofenceEntry, GeofenceId, PolylinePoint, Session, SessionId,
};
use crate::store::{StoreResult, TrackingStore};

#[derive(Default)]
struct Tables {
    next_id: i64,
    employees: BTreeMap<EmployeeId, Employee>,
    geofences: BTreeMap<GeofenceId, Geofence>,
    assignments: BTreeMap<AssignmentId, GeofenceAssignment>,
    sessions: HashMap<SessionId, Session>,
    active_by_employee: HashMap<EmployeeId, SessionId>,
    entries: BTreeMap<AssignmentId, GeofenceEntry>,
    points: HashMap<SessionId, Vec<PolylinePoint>>,
    injected_failures: u32,
    injected_by_op: HashMap<WriteOp, u32>,
}

/// Write operations of [`MemoryStore`] that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    InsertSession,
    UpdateSession,
    MarkEntered,
    AppendPoint,
    PurgePoints,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Consume one injected failure, if any are pending
    fn check_write(&mut self, op: WriteOp) -> StoreResult<()> {
        if let Some(remaining) = self.injected_by_op.get_mut(&op).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

/// Store keeping every table in memory behind one lock
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an employee
    pub fn add_employee(&self, name: &str, employee_code: &str, home: Option<Circle>) -> Employee {
        let mut tables = self.tables();
        let employee = Employee {
            id: EmployeeId(tables.next_id()),
            name: name.to_string(),
            employee_code: employee_code.to_string(),
            is_active: true,
            home,
        };
        tables.employees.insert(employee.id, employee.clone());
        employee
    }

    /// Mark an employee inactive; inactive employees cannot check in
    pub fn deactivate_employee(&self, id: EmployeeId) {
        if let Some(employee) = self.tables().employees.get_mut(&id) {
            employee.is_active = false;
        }
    }

    /// Register a geofence
    pub fn add_geofence(&self, name: &str, circle: Circle) -> Geofence {
        let mut tables = self.tables();
        let geofence = Geofence {
            id: GeofenceId(tables.next_id()),
            name: name.to_string(),
            circle,
        };
        tables.geofences.insert(geofence.id, geofence.clone());
        geofence
    }

    /// Assign a geofence to an employee for one date
    pub fn assign(
        &self,
        employee_id: EmployeeId,
        geofence_id: GeofenceId,
        assigned_date: NaiveDate,
    ) -> GeofenceAssignment {
        let mut tables = self.tables();
        let assignment = GeofenceAssignment {
            id: AssignmentId(tables.next_id()),
            employee_id,
            geofence_id,
            assigned_date,
        };
        tables.assignments.insert(assignment.id, assignment.clone());
        assignment
    }

    /// Make the next `count` writes fail with [`StoreError::Unavailable`]
    pub fn fail_next_writes(&self, count: u32) {
        self.tables().injected_failures = count;
    }

    /// Make the next `count` calls of one write operation fail with
    /// [`StoreError::Unavailable`], leaving other writes untouched
    pub fn fail_next(&self, op: WriteOp, count: u32) {
        self.tables().injected_by_op.insert(op, count);
    }
}

impl TrackingStore for MemoryStore {
    async fn employee(&self, id: EmployeeId) -> StoreResult<Option<Employee>> {
        Ok(self.tables().employees.get(&id).cloned())
    }

    async fn employee_by_code(&self, code: &str) -> StoreResult<Option<Employee>> {
        Ok(self
            .tables()
            .employees
            .values()
            .find(|e| e.employee_code == code)
            .cloned())
    }

    async fn assignments_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> StoreResult<Vec<AssignedGeofence>> {
        let tables = self.tables();
        let assigned = tables
            .assignments
            .values()
            .filter(|a| a.employee_id == employee_id && a.assigned_date == date)
            .filter_map(|a| {
                tables.geofences.get(&a.geofence_id).map(|g| AssignedGeofence {
                    assignment: a.clone(),
                    geofence: g.clone(),
                })
            })
            .collect();
        Ok(assigned)
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables();
        tables.check_write(WriteOp::InsertSession)?;
        if tables.active_by_employee.contains_key(&session.employee_id) {
            return Err(StoreError::Conflict(format!(
                "employee {} already has an active session",
                session.employee_id
            )));
        }
        if session.is_active() {
            tables
                .active_by_employee
                .insert(session.employee_id, session.id);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        Ok(self.tables().sessions.get(&id).cloned())
    }

    async fn active_session(&self, employee_id: EmployeeId) -> StoreResult<Option<Session>> {
        let tables = self.tables();
        Ok(tables
            .active_by_employee
            .get(&employee_id)
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let mut tables = self.tables();
        tables.check_write(WriteOp::UpdateSession)?;
        if !tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Backend(format!(
                "session {} does not exist",
                session.id
            )));
        }
        if !session.is_active()
            && tables.active_by_employee.get(&session.employee_id) == Some(&session.id)
        {
            tables.active_by_employee.remove(&session.employee_id);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn sessions_for_employee(&self, employee_id: EmployeeId) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.employee_id == employee_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .tables()
            .sessions
            .values()
            .filter(|s| s.started_at >= from && s.started_at < to)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    async fn idle_sessions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Session>> {
        Ok(self
            .tables()
            .sessions
            .values()
            .filter(|s| s.is_active() && s.last_seen_at < cutoff)
            .cloned()
            .collect())
    }

    async fn mark_entered(&self, entry: &GeofenceEntry) -> StoreResult<bool> {
        let mut tables = self.tables();
        tables.check_write(WriteOp::MarkEntered)?;
        if tables.entries.contains_key(&entry.assignment_id) {
            return Ok(false);
        }
        tables.entries.insert(entry.assignment_id, entry.clone());
        Ok(true)
    }

    async fn entries_for(&self, assignment_ids: &[AssignmentId]) -> StoreResult<Vec<GeofenceEntry>> {
        let tables = self.tables();
        Ok(assignment_ids
            .iter()
            .filter_map(|id| tables.entries.get(id).cloned())
            .collect())
    }

    async fn entries_for_session(&self, session_id: SessionId) -> StoreResult<Vec<GeofenceEntry>> {
        Ok(self
            .tables()
            .entries
            .values()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn last_point(&self, session_id: SessionId) -> StoreResult<Option<PolylinePoint>> {
        Ok(self
            .tables()
            .points
            .get(&session_id)
            .and_then(|points| points.last())
            .cloned())
    }

    async fn append_point(&self, point: &PolylinePoint) -> StoreResult<()> {
        let mut tables = self.tables();
        tables.check_write(WriteOp::AppendPoint)?;
        let points = tables.points.entry(point.session_id).or_default();
        if points.last().is_some_and(|last| last.sequence >= point.sequence) {
            return Err(StoreError::Conflict(format!(
                "sequence {} already recorded for session {}",
                point.sequence, point.session_id
            )));
        }
        points.push(point.clone());
        Ok(())
    }

    async fn points(&self, session_id: SessionId) -> StoreResult<Vec<PolylinePoint>> {
        Ok(self
            .tables()
            .points
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn purge_points_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables();
        tables.check_write(WriteOp::PurgePoints)?;
        let mut removed = 0u64;
        for points in tables.points.values_mut() {
            let before = points.len();
            points.retain(|p| p.recorded_at >= cutoff);
            removed += (before - points.len()) as u64;
        }
        tables.points.retain(|_, points| !points.is_empty());
        Ok(removed)
    }
}
