//! Session lifecycle and the per-session writer lock
//!
//! [`SessionStore`] is the only component that writes [`Session`] records.
//! Every mutation of an existing session happens while holding that
//! session's [`SessionGuard`], which makes the monotonic-timestamp check and
//! the cumulative-distance update one atomic step per session while leaving
//! different sessions fully parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult, StoreError};
use crate::geo::{self, Position};
use crate::model::{
    CheckinArtifacts, CheckoutArtifacts, CloseReason, Employee, EmployeeId, LiveLocation, Session,
    SessionId, SessionState,
};
use crate::retry::RetryPolicy;
use crate::store::TrackingStore;

type LockMap = Arc<StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>>;

/// Exclusive write access to one session
///
/// Dropping the last guard of a session with no queued writers removes its
/// mutex from the lock map, so ids that never name a live session do not
/// accumulate.
pub struct SessionGuard {
    session_id: SessionId,
    locks: LockMap,
    mutex: Arc<Mutex<()>>,
    _lock: OwnedMutexGuard<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map, this guard and the held lock; anything more is a waiter
        let unshared = locks
            .get(&self.session_id)
            .is_some_and(|m| Arc::ptr_eq(m, &self.mutex) && Arc::strong_count(m) == 3);
        if unshared {
            locks.remove(&self.session_id);
        }
    }
}

/// Result of applying one sample to a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Movement {
    /// The sample advanced the session
    Accepted { delta_m: f64, total_m: f64 },
    /// The sample was not newer than the last accepted one and was ignored
    Stale,
}

impl Movement {
    pub fn delta_m(&self) -> f64 {
        match self {
            Movement::Accepted { delta_m, .. } => *delta_m,
            Movement::Stale => 0.0,
        }
    }
}

/// A newer sample applied to a session copy that is not yet written
#[derive(Debug, Clone)]
pub struct PendingMovement {
    session: Session,
    delta_m: f64,
}

impl PendingMovement {
    pub fn employee_id(&self) -> EmployeeId {
        self.session.employee_id
    }

    pub fn delta_m(&self) -> f64 {
        self.delta_m
    }

    /// Cumulative distance once committed
    pub fn total_m(&self) -> f64 {
        self.session.distance_m
    }
}

pub struct SessionStore<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    locks: LockMap,
}

impl<S> Clone for SessionStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            retry: self.retry,
            locks: self.locks.clone(),
        }
    }
}

impl<S: TrackingStore> SessionStore<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            retry,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive write access to a session
    pub async fn lock(&self, session_id: SessionId) -> SessionGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(session_id).or_default().clone()
        };
        let held = mutex.clone().lock_owned().await;
        SessionGuard {
            session_id,
            locks: self.locks.clone(),
            mutex,
            _lock: held,
        }
    }

    /// Open a new active session for an employee
    pub async fn start_session(
        &self,
        employee: &Employee,
        position: Position,
        checkin: CheckinArtifacts,
    ) -> EngineResult<Session> {
        position.validate()?;

        if !employee.is_active {
            return Err(EngineError::EmployeeNotFound(employee.id.to_string()));
        }

        match &employee.home {
            Some(home) => {
                let distance_m = geo::distance_meters(home.center, position)?;
                if distance_m > home.radius_m {
                    warn!(
                        "Check-in denied for employee {}: {:.1} m from home, allowed {:.1} m",
                        employee.id, distance_m, home.radius_m
                    );
                    return Err(EngineError::OutsideHomeRadius {
                        distance_m,
                        radius_m: home.radius_m,
                    });
                }
            }
            None => debug!(
                "Employee {} has no home location; skipping home radius check",
                employee.id
            ),
        }

        let now = self.clock.now();
        let session = Session {
            id: SessionId::new(),
            employee_id: employee.id,
            state: SessionState::Active,
            started_at: now,
            start_position: position,
            checkin,
            last_position: position,
            last_seen_at: now,
            distance_m: 0.0,
            ended_at: None,
            end_position: None,
            checkout: None,
            close_reason: None,
        };

        self.retry
            .run("insert session", || self.store.insert_session(&session))
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => EngineError::SessionAlreadyActive(employee.id),
                other => EngineError::Storage(other),
            })?;

        info!(
            "Session {} started for employee {} at ({}, {})",
            session.id, employee.id, position.lat, position.lng
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: SessionId) -> EngineResult<Session> {
        self.store
            .session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    pub async fn active_session_for(&self, employee_id: EmployeeId) -> EngineResult<Option<Session>> {
        Ok(self.store.active_session(employee_id).await?)
    }

    pub async fn sessions_for_employee(&self, employee_id: EmployeeId) -> EngineResult<Vec<Session>> {
        Ok(self.store.sessions_for_employee(employee_id).await?)
    }

    /// Advance a session by one sample.
    ///
    /// A sample whose timestamp is not strictly after the last accepted one
    /// is a no-op ([`Movement::Stale`]); retried or reordered deliveries
    /// therefore never count distance twice.
    #[cfg(test)]
    pub async fn record_movement(
        &self,
        guard: &SessionGuard,
        position: Position,
        at: DateTime<Utc>,
    ) -> EngineResult<Movement> {
        match self.prepare_movement(guard, position, at).await? {
            Some(pending) => self.commit_movement(guard, pending).await,
            None => Ok(Movement::Stale),
        }
    }

    /// Apply a sample to a copy of the session without writing it.
    /// `None` means the sample is stale.
    pub async fn prepare_movement(
        &self,
        guard: &SessionGuard,
        position: Position,
        at: DateTime<Utc>,
    ) -> EngineResult<Option<PendingMovement>> {
        let mut session = self.get(guard.session_id).await?;
        if !session.is_active() {
            return Err(EngineError::SessionClosed(session.id));
        }

        if at <= session.last_seen_at {
            debug!(
                "Stale sample for session {}: {} <= {}",
                session.id, at, session.last_seen_at
            );
            return Ok(None);
        }

        let delta_m = geo::distance_meters(session.last_position, position)?;
        session.distance_m += delta_m;
        session.last_position = position;
        session.last_seen_at = at;
        Ok(Some(PendingMovement { session, delta_m }))
    }

    /// Write a prepared movement. Until this succeeds the session still
    /// accepts the same sample again.
    pub async fn commit_movement(
        &self,
        guard: &SessionGuard,
        pending: PendingMovement,
    ) -> EngineResult<Movement> {
        if pending.session.id != guard.session_id {
            return Err(EngineError::InvalidInput(format!(
                "movement for session {} committed under the lock of {}",
                pending.session.id, guard.session_id
            )));
        }
        let PendingMovement { session, delta_m } = pending;
        self.retry
            .run("update session", || self.store.update_session(&session))
            .await?;

        debug!(
            "Session {} moved {:.1} m (total {:.1} m)",
            session.id, delta_m, session.distance_m
        );
        Ok(Movement::Accepted {
            delta_m,
            total_m: session.distance_m,
        })
    }

    /// Close an active session.
    ///
    /// Without an explicit end position the last known position is used; an
    /// explicit one adds the final leg to the distance.
    pub async fn close_session(
        &self,
        guard: &SessionGuard,
        end_position: Option<Position>,
        checkout: Option<CheckoutArtifacts>,
        reason: CloseReason,
    ) -> EngineResult<Session> {
        let mut session = self.get(guard.session_id).await?;
        if !session.is_active() {
            return Err(EngineError::SessionAlreadyClosed(session.id));
        }

        if let Some(end) = end_position {
            session.distance_m += geo::distance_meters(session.last_position, end)?;
            session.last_position = end;
        }

        let now = self.clock.now();
        session.state = SessionState::Closed;
        session.ended_at = Some(now.max(session.last_seen_at));
        session.end_position = Some(session.last_position);
        session.checkout = checkout;
        session.close_reason = Some(reason);

        self.retry
            .run("close session", || self.store.update_session(&session))
            .await?;

        info!(
            "Session {} closed ({:?}) after {:.1} m",
            session.id, reason, session.distance_m
        );
        Ok(session)
    }

    /// Close every active session that has not accepted a sample for `max_idle`
    pub async fn close_idle(&self, max_idle: Duration) -> EngineResult<Vec<SessionId>> {
        let cutoff = self.clock.now() - max_idle;
        let candidates = self.store.idle_sessions(cutoff).await?;

        let mut closed = Vec::new();
        for candidate in candidates {
            let guard = self.lock(candidate.id).await;
            // re-check under the lock; an update may have landed meanwhile
            let current = self.get(candidate.id).await?;
            if !current.is_active() || current.last_seen_at >= cutoff {
                continue;
            }
            warn!(
                "Closing idle session {} (last seen {})",
                current.id, current.last_seen_at
            );
            self.close_session(&guard, None, None, CloseReason::IdleTimeout)
                .await?;
            closed.push(current.id);
        }
        Ok(closed)
    }

    /// Latest fix of a session; `None` when the session is unknown
    pub async fn live_location(&self, session_id: SessionId) -> EngineResult<Option<LiveLocation>> {
        Ok(self
            .store
            .session(session_id)
            .await?
            .map(|session| LiveLocation {
                session_id: session.id,
                lat: session.last_position.lat,
                lng: session.last_position.lng,
                timestamp: session.last_seen_at,
                active: session.is_active(),
            }))
    }
}
