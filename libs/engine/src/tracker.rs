//! Facade wiring the engine components over one store

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::geo::Position;
use crate::geofence::GeofenceEngine;
use crate::ingest::{LocationIngestor, MAX_CLOCK_SKEW_SECS, UpdateOutcome};
use crate::model::{
    CheckinArtifacts, CheckoutArtifacts, CloseReason, DailySummary, Employee, EmployeeId,
    GeofenceEntry, LiveLocation, PolylinePoint, Session, SessionId, Target,
};
use crate::polyline::{POLYLINE_MIN_INTERVAL_SECS, PolylineLog};
use crate::retry::RetryPolicy;
use crate::session::SessionStore;
use crate::store::TrackingStore;
use crate::summary::{Period, SummaryAggregator};

/// Tunables of the engine
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub polyline_min_interval: Duration,
    /// Client timestamps later than server time plus this are rejected
    pub max_clock_skew: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polyline_min_interval: Duration::seconds(POLYLINE_MIN_INTERVAL_SECS),
            max_clock_skew: Duration::seconds(MAX_CLOCK_SKEW_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Tracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sessions: SessionStore<S>,
    geofences: GeofenceEngine<S>,
    polyline: PolylineLog<S>,
    ingestor: LocationIngestor<S>,
    summaries: SummaryAggregator<S>,
}

impl<S: TrackingStore> Tracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let sessions = SessionStore::new(store.clone(), clock.clone(), config.retry);
        let geofences = GeofenceEngine::new(store.clone(), config.retry);
        let polyline = PolylineLog::new(store.clone(), config.polyline_min_interval, config.retry);
        let ingestor = LocationIngestor::new(
            sessions.clone(),
            geofences.clone(),
            polyline.clone(),
            clock.clone(),
            config.max_clock_skew,
        );
        let summaries = SummaryAggregator::new(store.clone(), clock.clone());

        Self {
            store,
            clock,
            sessions,
            geofences,
            polyline,
            ingestor,
            summaries,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn employee(&self, id: EmployeeId) -> EngineResult<Employee> {
        self.store
            .employee(id)
            .await?
            .ok_or_else(|| EngineError::EmployeeNotFound(id.to_string()))
    }

    /// Look an employee up by numeric id, falling back to employee code
    pub async fn resolve_employee(&self, identifier: &str) -> EngineResult<Employee> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(EngineError::InvalidInput(
                "employee identifier is required".to_string(),
            ));
        }
        let found = match identifier.parse::<i64>() {
            Ok(id) => self.store.employee(EmployeeId(id)).await?,
            Err(_) => self.store.employee_by_code(identifier).await?,
        };
        found.ok_or_else(|| EngineError::EmployeeNotFound(identifier.to_string()))
    }

    /// Check an employee in and record the start of the path
    pub async fn check_in(
        &self,
        employee_id: EmployeeId,
        lat: f64,
        lng: f64,
        checkin: CheckinArtifacts,
    ) -> EngineResult<Session> {
        let position = Position::new(lat, lng)?;
        let employee = self.employee(employee_id).await?;
        let session = self
            .sessions
            .start_session(&employee, position, checkin)
            .await?;

        // the start position also lives on the session, so a failed first
        // point does not invalidate the check-in
        if let Err(e) = self
            .polyline
            .maybe_append(session.id, position, session.started_at)
            .await
        {
            error!("Failed to record start point for session {}: {}", session.id, e);
        }
        Ok(session)
    }

    pub async fn update_location(
        &self,
        session_id: SessionId,
        lat: f64,
        lng: f64,
        client_time: Option<DateTime<Utc>>,
    ) -> EngineResult<UpdateOutcome> {
        self.ingestor.update(session_id, lat, lng, client_time).await
    }

    /// Check a session out; an explicit end position becomes the checkout
    /// point of the path
    pub async fn check_out(
        &self,
        session_id: SessionId,
        end: Option<(f64, f64)>,
        checkout: CheckoutArtifacts,
    ) -> EngineResult<Session> {
        let end_position = end
            .map(|(lat, lng)| Position::new(lat, lng))
            .transpose()?;

        let guard = self.sessions.lock(session_id).await;
        let session = self
            .sessions
            .close_session(&guard, end_position, Some(checkout), CloseReason::Checkout)
            .await?;
        if let (Some(position), Some(ended_at)) = (end_position, session.ended_at) {
            if let Err(e) = self
                .polyline
                .append_checkout(session_id, position, ended_at)
                .await
            {
                error!("Failed to record checkout point for session {}: {}", session_id, e);
            }
        }
        drop(guard);

        info!(
            "Session {} checked out by employee {}",
            session.id, session.employee_id
        );
        Ok(session)
    }

    pub async fn session(&self, session_id: SessionId) -> EngineResult<Session> {
        self.sessions.get(session_id).await
    }

    pub async fn sessions_for_employee(&self, employee_id: EmployeeId) -> EngineResult<Vec<Session>> {
        self.employee(employee_id).await?;
        self.sessions.sessions_for_employee(employee_id).await
    }

    pub async fn live_location(&self, session_id: SessionId) -> EngineResult<Option<LiveLocation>> {
        self.sessions.live_location(session_id).await
    }

    pub async fn polyline_points(&self, session_id: SessionId) -> EngineResult<Vec<PolylinePoint>> {
        self.polyline.points_for(session_id).await
    }

    /// Targets of an employee for a date, today by default
    pub async fn targets(
        &self,
        employee_id: EmployeeId,
        date: Option<NaiveDate>,
    ) -> EngineResult<Vec<Target>> {
        let date = date.unwrap_or_else(|| self.today());
        self.geofences.assignments_for(employee_id, date).await
    }

    pub async fn session_entries(&self, session_id: SessionId) -> EngineResult<Vec<GeofenceEntry>> {
        self.sessions.get(session_id).await?;
        self.geofences.entries_for_session(session_id).await
    }

    pub async fn summary_for(
        &self,
        employee_id: EmployeeId,
        date: NaiveDate,
    ) -> EngineResult<DailySummary> {
        self.summaries.summary_for(employee_id, date).await
    }

    pub async fn period_summaries(&self, period: Period) -> EngineResult<Vec<DailySummary>> {
        self.summaries.summaries(period).await
    }

    pub async fn employee_summaries(&self, employee_id: EmployeeId) -> EngineResult<Vec<DailySummary>> {
        self.summaries.employee_summaries(employee_id).await
    }

    /// Close sessions that stopped reporting
    pub async fn close_idle(&self, max_idle: Duration) -> EngineResult<Vec<SessionId>> {
        self.sessions.close_idle(max_idle).await
    }

    /// Remove recorded path points older than `retention`
    pub async fn purge_gps(&self, retention: Duration) -> EngineResult<u64> {
        self.polyline.purge_before(self.clock.now() - retention).await
    }
}
