//! Entry point for position updates
//!
//! One accepted sample becomes one [`AcceptedUpdate`] which is dispatched to
//! the two cadences: the geofence check on every update and the rate-limited
//! polyline log. Rejected (stale) samples never reach either.
//!
//! The session itself is written last. Geofence entry is a compare-and-set
//! and the polyline skips a repeated timestamp, so when any write fails the
//! client can resend the same sample and every effect lands exactly once.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::geo::Position;
use crate::geofence::GeofenceEngine;
use crate::model::{AssignmentId, EmployeeId, SessionId};
use crate::polyline::PolylineLog;
use crate::session::SessionStore;
use crate::store::TrackingStore;

use std::sync::Arc;

/// How far ahead of the server clock a client timestamp may be
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// A validated sample that advanced its session
#[derive(Debug, Clone, Copy)]
pub struct AcceptedUpdate {
    pub session_id: SessionId,
    pub employee_id: EmployeeId,
    pub position: Position,
    pub at: DateTime<Utc>,
    pub delta_m: f64,
    pub total_m: f64,
}

/// What happened to one update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub accepted: bool,
    pub polyline_logged: bool,
    pub geofences_entered: Vec<AssignmentId>,
    /// Cumulative session distance after this update, in meters
    pub distance_m: f64,
    /// Sample time of an accepted update
    pub recorded_at: Option<DateTime<Utc>>,
}

impl UpdateOutcome {
    fn stale(distance_m: f64) -> Self {
        Self {
            accepted: false,
            polyline_logged: false,
            geofences_entered: Vec::new(),
            distance_m,
            recorded_at: None,
        }
    }
}

pub struct LocationIngestor<S> {
    sessions: SessionStore<S>,
    geofences: GeofenceEngine<S>,
    polyline: PolylineLog<S>,
    clock: Arc<dyn Clock>,
    max_clock_skew: Duration,
}

impl<S> Clone for LocationIngestor<S> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            geofences: self.geofences.clone(),
            polyline: self.polyline.clone(),
            clock: self.clock.clone(),
            max_clock_skew: self.max_clock_skew,
        }
    }
}

impl<S: TrackingStore> LocationIngestor<S> {
    pub fn new(
        sessions: SessionStore<S>,
        geofences: GeofenceEngine<S>,
        polyline: PolylineLog<S>,
        clock: Arc<dyn Clock>,
        max_clock_skew: Duration,
    ) -> Self {
        Self {
            sessions,
            geofences,
            polyline,
            clock,
            max_clock_skew,
        }
    }

    /// Process one position update. `client_time` defaults to the server
    /// clock when the client does not send one.
    pub async fn update(
        &self,
        session_id: SessionId,
        lat: f64,
        lng: f64,
        client_time: Option<DateTime<Utc>>,
    ) -> EngineResult<UpdateOutcome> {
        let now = self.clock.now();
        let at = client_time.unwrap_or(now);
        debug!(
            "Location update received - session_id: {}, lat: {}, lng: {}",
            session_id, lat, lng
        );

        let guard = self.sessions.lock(session_id).await;

        let session = self.sessions.get(session_id).await?;
        if !session.is_active() {
            return Err(EngineError::SessionClosed(session_id));
        }
        let position = Position::new(lat, lng)?;
        if at > now + self.max_clock_skew {
            warn!(
                "Rejected sample for session {}: timestamp {} is ahead of server time {}",
                session_id, at, now
            );
            return Err(EngineError::InvalidInput(format!(
                "timestamp {at} is more than {}s ahead of server time",
                self.max_clock_skew.num_seconds()
            )));
        }

        let Some(pending) = self.sessions.prepare_movement(&guard, position, at).await? else {
            return Ok(UpdateOutcome::stale(session.distance_m));
        };

        let update = AcceptedUpdate {
            session_id,
            employee_id: pending.employee_id(),
            position,
            at,
            delta_m: pending.delta_m(),
            total_m: pending.total_m(),
        };
        let outcome = self.dispatch(&update).await?;

        self.sessions.commit_movement(&guard, pending).await?;
        drop(guard);

        info!(
            "Location update processed - session {}: polyline_logged: {}, geofences_entered: {}",
            session_id,
            outcome.polyline_logged,
            outcome.geofences_entered.len()
        );
        Ok(outcome)
    }

    /// Fan an accepted update out to both subscribers
    async fn dispatch(&self, update: &AcceptedUpdate) -> EngineResult<UpdateOutcome> {
        let geofences_entered = self
            .geofences
            .evaluate(
                update.employee_id,
                update.session_id,
                update.position,
                update.at.date_naive(),
                update.at,
            )
            .await?;

        let polyline_logged = self
            .polyline
            .maybe_append(update.session_id, update.position, update.at)
            .await?;

        Ok(UpdateOutcome {
            accepted: true,
            polyline_logged,
            geofences_entered,
            distance_m: update.total_m,
            recorded_at: Some(update.at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::Circle;
    use crate::model::{CheckinArtifacts, CheckoutArtifacts, Employee, GeofenceStatus};
    use crate::store::{MemoryStore, WriteOp};
    use crate::tracker::{EngineConfig, Tracker};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: Arc<MemoryStore>,
        tracker: Tracker<MemoryStore>,
        employee: Employee,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(t0() + Duration::seconds(secs))
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let tracker = Tracker::new(store.clone(), clock, EngineConfig::default());
        let employee = store.add_employee("Asha", "FT-001", None);
        Fixture {
            store,
            tracker,
            employee,
        }
    }

    #[tokio::test]
    async fn test_same_position_updates_and_polyline_cadence() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        let first = f
            .tracker
            .update_location(session.id, 17.452, 78.3974, at(10))
            .await
            .unwrap();
        assert!(first.accepted);
        assert!(!first.polyline_logged);
        assert_eq!(first.distance_m, 0.0);

        let second = f
            .tracker
            .update_location(session.id, 17.452, 78.3974, at(70))
            .await
            .unwrap();
        assert!(second.accepted);
        assert!(second.polyline_logged);
        assert_eq!(second.distance_m, 0.0);

        let points = f.tracker.polyline_points(session.id).await.unwrap();
        let times: Vec<_> = points.iter().map(|p| p.recorded_at).collect();
        assert_eq!(times, vec![t0(), t0() + Duration::seconds(70)]);
    }

    #[tokio::test]
    async fn test_resent_update_has_no_second_effect() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        let first = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(60))
            .await
            .unwrap();
        assert!(first.accepted && first.polyline_logged);

        let resent = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(60))
            .await
            .unwrap();
        assert!(!resent.accepted);
        assert!(!resent.polyline_logged);
        assert!(resent.geofences_entered.is_empty());
        assert_eq!(resent.distance_m, first.distance_m);

        let stored = f.tracker.session(session.id).await.unwrap();
        assert_eq!(stored.distance_m, first.distance_m);
        assert_eq!(f.tracker.polyline_points(session.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_geofence_checked_between_polyline_points() {
        let f = fixture();
        let north = f.store.add_geofence(
            "North",
            Circle::new(Position::new(17.458, 78.3974).unwrap(), 150.0).unwrap(),
        );
        let assignment = f.store.assign(f.employee.id, north.id, t0().date_naive());
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        let mut entered_steps = Vec::new();
        for (step, lat) in [17.453, 17.454, 17.455, 17.456, 17.457, 17.458]
            .into_iter()
            .enumerate()
        {
            let outcome = f
                .tracker
                .update_location(session.id, lat, 78.3974, at(5 * (step as i64 + 1)))
                .await
                .unwrap();
            assert!(outcome.accepted);
            assert!(!outcome.polyline_logged);
            if !outcome.geofences_entered.is_empty() {
                assert_eq!(outcome.geofences_entered, vec![assignment.id]);
                entered_steps.push(step);
            }
        }
        assert_eq!(entered_steps, vec![4]);
    }

    #[tokio::test]
    async fn test_update_after_checkout_fails_closed() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();
        f.tracker
            .check_out(session.id, None, CheckoutArtifacts::default())
            .await
            .unwrap();

        let err = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(30))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionClosed(id) if id == session.id));
    }

    #[tokio::test]
    async fn test_rejects_unknown_session_and_bad_coordinates() {
        let f = fixture();
        let err = f
            .tracker
            .update_location(SessionId::new(), 17.0, 78.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));

        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();
        let err = f
            .tracker
            .update_location(session.id, 95.0, 78.0, at(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidCoordinate { .. }));

        let stored = f.tracker.session(session.id).await.unwrap();
        assert_eq!(stored.last_seen_at, t0());
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_counts_once() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.450, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        let late = f
            .tracker
            .update_location(session.id, 17.452, 78.3974, at(20))
            .await
            .unwrap();
        let early = f
            .tracker
            .update_location(session.id, 17.451, 78.3974, at(10))
            .await
            .unwrap();
        assert!(late.accepted);
        assert!(!early.accepted);

        let stored = f.tracker.session(session.id).await.unwrap();
        assert_eq!(stored.distance_m, late.distance_m);
    }

    #[tokio::test]
    async fn test_sessions_update_in_parallel() {
        let f = fixture();
        let tracker = Arc::new(f.tracker);
        let mut ids = Vec::new();
        for i in 0..4 {
            let employee = f.store.add_employee("Crew", &format!("CREW-{i}"), None);
            let session = tracker
                .check_in(employee.id, 17.450, 78.3974, CheckinArtifacts::default())
                .await
                .unwrap();
            ids.push(session.id);
        }

        let mut handles = Vec::new();
        for id in ids.clone() {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for step in 1..=5 {
                    tracker
                        .update_location(id, 17.450 + 0.001 * step as f64, 78.3974, at(step * 10))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for id in ids {
            let session = tracker.session(id).await.unwrap();
            assert!((session.distance_m - 5.0 * 111.195).abs() < 1.0);
        }
    }

    async fn north_walk(f: &Fixture) -> (SessionId, AssignmentId) {
        let north = f.store.add_geofence(
            "North",
            Circle::new(Position::new(17.458, 78.3974).unwrap(), 150.0).unwrap(),
        );
        let assignment = f.store.assign(f.employee.id, north.id, t0().date_naive());
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();
        (session.id, assignment.id)
    }

    async fn north_status(f: &Fixture) -> GeofenceStatus {
        let targets = f
            .tracker
            .targets(f.employee.id, Some(t0().date_naive()))
            .await
            .unwrap();
        targets[0].status.clone()
    }

    #[tokio::test]
    async fn test_failed_geofence_write_keeps_sample_resendable() {
        let f = fixture();
        let (session_id, assignment_id) = north_walk(&f).await;

        f.store.fail_next(WriteOp::MarkEntered, 3);
        let err = f
            .tracker
            .update_location(session_id, 17.458, 78.3974, at(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));

        let stored = f.tracker.session(session_id).await.unwrap();
        assert_eq!(stored.distance_m, 0.0);
        assert_eq!(stored.last_seen_at, t0());
        assert_eq!(north_status(&f).await, GeofenceStatus::Pending);

        let resent = f
            .tracker
            .update_location(session_id, 17.458, 78.3974, at(10))
            .await
            .unwrap();
        assert!(resent.accepted);
        assert_eq!(resent.geofences_entered, vec![assignment_id]);
        assert!((resent.distance_m - 667.17).abs() < 1.0);
        assert!(north_status(&f).await.is_entered());
    }

    #[tokio::test]
    async fn test_failed_session_write_applies_effects_once_on_resend() {
        let f = fixture();
        let (session_id, _) = north_walk(&f).await;

        f.store.fail_next(WriteOp::UpdateSession, 3);
        let err = f
            .tracker
            .update_location(session_id, 17.458, 78.3974, at(60))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(f.tracker.session(session_id).await.unwrap().distance_m, 0.0);

        let resent = f
            .tracker
            .update_location(session_id, 17.458, 78.3974, at(60))
            .await
            .unwrap();
        assert!(resent.accepted);
        assert!(resent.geofences_entered.is_empty());
        assert!(!resent.polyline_logged);
        assert!((resent.distance_m - 667.17).abs() < 1.0);

        assert!(north_status(&f).await.is_entered());
        assert_eq!(f.tracker.session_entries(session_id).await.unwrap().len(), 1);
        assert_eq!(f.tracker.polyline_points(session_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_polyline_write_keeps_sample_resendable() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        f.store.fail_next(WriteOp::AppendPoint, 3);
        f.tracker
            .update_location(session.id, 17.453, 78.3974, at(60))
            .await
            .unwrap_err();
        assert_eq!(f.tracker.polyline_points(session.id).await.unwrap().len(), 1);

        let resent = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(60))
            .await
            .unwrap();
        assert!(resent.accepted && resent.polyline_logged);
        assert_eq!(resent.recorded_at, at(60));
        assert_eq!(f.tracker.polyline_points(session.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_future_timestamp_is_rejected() {
        let f = fixture();
        let session = f
            .tracker
            .check_in(f.employee.id, 17.452, 78.3974, CheckinArtifacts::default())
            .await
            .unwrap();

        let err = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(365 * 24 * 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        let stored = f.tracker.session(session.id).await.unwrap();
        assert_eq!(stored.last_seen_at, t0());
        assert_eq!(stored.tracked_seconds(), 0);

        // within the allowed skew
        let ahead = f
            .tracker
            .update_location(session.id, 17.453, 78.3974, at(MAX_CLOCK_SKEW_SECS))
            .await
            .unwrap();
        assert!(ahead.accepted);

        let err = f
            .tracker
            .update_location(session.id, 17.454, 78.3974, at(MAX_CLOCK_SKEW_SECS + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
