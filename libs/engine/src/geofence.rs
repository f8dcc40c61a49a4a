//! Geofence containment and assignment status transitions

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::geo::{self, Position};
use crate::model::{
    AssignmentId, EmployeeId, GeofenceEntry, GeofenceStatus, SessionId, Target,
};
use crate::retry::RetryPolicy;
use crate::store::TrackingStore;

pub struct GeofenceEngine<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S> Clone for GeofenceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry,
        }
    }
}

impl<S: TrackingStore> GeofenceEngine<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// An employee's targets for a date with their current status
    pub async fn assignments_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> EngineResult<Vec<Target>> {
        let assigned = self.store.assignments_for(employee_id, date).await?;
        let ids: Vec<AssignmentId> = assigned.iter().map(|a| a.assignment.id).collect();
        let mut entries: HashMap<AssignmentId, GeofenceEntry> = self
            .store
            .entries_for(&ids)
            .await?
            .into_iter()
            .map(|e| (e.assignment_id, e))
            .collect();

        Ok(assigned
            .into_iter()
            .map(|a| {
                let status = match entries.remove(&a.assignment.id) {
                    Some(entry) => GeofenceStatus::Entered {
                        entered_at: entry.entered_at,
                        session_id: entry.session_id,
                    },
                    None => GeofenceStatus::Pending,
                };
                Target {
                    assignment: a.assignment,
                    geofence: a.geofence,
                    status,
                }
            })
            .collect())
    }

    /// Test `position` against every pending assignment due on `date` and
    /// return the assignments that transitioned to entered.
    ///
    /// The transition is a compare-and-set in the store, so an assignment is
    /// reported at most once even when evaluations race or the employee
    /// passes through the same region again.
    pub async fn evaluate(
        &self,
        employee_id: EmployeeId,
        session_id: SessionId,
        position: Position,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> EngineResult<Vec<AssignmentId>> {
        let targets = self.assignments_for(employee_id, date).await?;
        debug!(
            "Checking {} geofence assignments for employee {}",
            targets.len(),
            employee_id
        );

        let mut entered = Vec::new();
        for target in targets {
            if target.status.is_entered() {
                continue;
            }
            if !geo::contains(&target.geofence.circle, position)? {
                continue;
            }

            let entry = GeofenceEntry {
                assignment_id: target.assignment.id,
                geofence_id: target.geofence.id,
                employee_id,
                session_id,
                entered_at: at,
            };
            let won = self
                .retry
                .run("mark geofence entered", || self.store.mark_entered(&entry))
                .await?;
            if won {
                info!(
                    "Employee {} entered geofence {} ({}) for assignment {}",
                    employee_id, target.geofence.name, target.geofence.id, target.assignment.id
                );
                entered.push(target.assignment.id);
            }
        }
        Ok(entered)
    }

    /// Geofence entries recorded during a session
    pub async fn entries_for_session(&self, session_id: SessionId) -> EngineResult<Vec<GeofenceEntry>> {
        Ok(self.store.entries_for_session(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Circle;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn pos(lat: f64, lng: f64) -> Position {
        Position::new(lat, lng).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        t0().date_naive()
    }

    #[tokio::test]
    async fn test_walk_into_north_fires_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeofenceEngine::new(store.clone(), RetryPolicy::none());
        let employee = store.add_employee("Asha", "E-1", None);
        let north = store.add_geofence(
            "North",
            Circle::new(pos(17.458, 78.3974), 150.0).unwrap(),
        );
        let assignment = store.assign(employee.id, north.id, today());
        let session = SessionId::new();

        let walk = [17.453, 17.454, 17.455, 17.456, 17.457, 17.458];
        let mut fired_at = Vec::new();
        for (step, lat) in walk.iter().enumerate() {
            let at = t0() + Duration::seconds(10 * (step as i64 + 1));
            let entered = engine
                .evaluate(employee.id, session, pos(*lat, 78.3974), today(), at)
                .await
                .unwrap();
            if !entered.is_empty() {
                assert_eq!(entered, vec![assignment.id]);
                fired_at.push(*lat);
            }
        }
        // 17.457 is the first step within 150 m of the center (about 111 m)
        assert_eq!(fired_at, vec![17.457]);

        let targets = engine.assignments_for(employee.id, today()).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].status.is_entered());
    }

    #[tokio::test]
    async fn test_reentry_does_not_refire() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeofenceEngine::new(store.clone(), RetryPolicy::none());
        let employee = store.add_employee("Asha", "E-1", None);
        let fence = store.add_geofence("Depot", Circle::new(pos(17.0, 78.0), 100.0).unwrap());
        store.assign(employee.id, fence.id, today());
        let session = SessionId::new();

        let inside = pos(17.0, 78.0);
        let outside = pos(17.01, 78.0);
        let mut total = 0;
        for (i, p) in [inside, outside, inside, outside, inside].iter().enumerate() {
            let at = t0() + Duration::seconds(i as i64 * 10);
            total += engine
                .evaluate(employee.id, session, *p, today(), at)
                .await
                .unwrap()
                .len();
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_overlapping_geofences_all_transition() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeofenceEngine::new(store.clone(), RetryPolicy::none());
        let employee = store.add_employee("Asha", "E-1", None);
        let a = store.add_geofence("A", Circle::new(pos(17.0, 78.0), 500.0).unwrap());
        let b = store.add_geofence("B", Circle::new(pos(17.001, 78.0), 500.0).unwrap());
        let far = store.add_geofence("Far", Circle::new(pos(18.0, 78.0), 500.0).unwrap());
        let first = store.assign(employee.id, a.id, today());
        let second = store.assign(employee.id, b.id, today());
        store.assign(employee.id, far.id, today());

        let mut entered = engine
            .evaluate(employee.id, SessionId::new(), pos(17.0005, 78.0), today(), t0())
            .await
            .unwrap();
        entered.sort();
        assert_eq!(entered, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_only_assignments_for_the_date_are_checked() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeofenceEngine::new(store.clone(), RetryPolicy::none());
        let employee = store.add_employee("Asha", "E-1", None);
        let other = store.add_employee("Ravi", "E-2", None);
        let fence = store.add_geofence("Depot", Circle::new(pos(17.0, 78.0), 100.0).unwrap());
        store.assign(employee.id, fence.id, today().pred_opt().unwrap());
        store.assign(other.id, fence.id, today());

        let entered = engine
            .evaluate(employee.id, SessionId::new(), pos(17.0, 78.0), today(), t0())
            .await
            .unwrap();
        assert!(entered.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_fire_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = GeofenceEngine::new(store.clone(), RetryPolicy::none());
        let employee = store.add_employee("Asha", "E-1", None);
        let fence = store.add_geofence("Depot", Circle::new(pos(17.0, 78.0), 100.0).unwrap());
        store.assign(employee.id, fence.id, today());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let employee_id = employee.id;
            handles.push(tokio::spawn(async move {
                engine
                    .evaluate(employee_id, SessionId::new(), pos(17.0, 78.0), today(), t0())
                    .await
                    .unwrap()
                    .len()
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1);
    }
}
