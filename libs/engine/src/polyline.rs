//! Rate-limited path recording
//!
//! Geofence detection needs every sample, path reconstruction only needs a
//! coarse trace. The log keeps at most one point per interval per session,
//! measured on sample timestamps rather than arrival order.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::geo::Position;
use crate::model::{PolylinePoint, SessionId};
use crate::retry::RetryPolicy;
use crate::store::TrackingStore;

/// Default spacing between recorded points
pub const POLYLINE_MIN_INTERVAL_SECS: i64 = 60;

pub struct PolylineLog<S> {
    store: Arc<S>,
    min_interval: Duration,
    retry: RetryPolicy,
}

impl<S> Clone for PolylineLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            min_interval: self.min_interval,
            retry: self.retry,
        }
    }
}

impl<S: TrackingStore> PolylineLog<S> {
    pub fn new(store: Arc<S>, min_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            store,
            min_interval,
            retry,
        }
    }

    /// Append a point unless one was recorded for this session within the
    /// interval. Returns whether the point was recorded.
    pub async fn maybe_append(
        &self,
        session_id: SessionId,
        position: Position,
        at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let last = self.store.last_point(session_id).await?;
        if let Some(last) = &last {
            if at <= last.recorded_at || at - last.recorded_at < self.min_interval {
                debug!(
                    "Polyline point skipped for session {}: {}s since last point",
                    session_id,
                    (at - last.recorded_at).num_seconds()
                );
                return Ok(false);
            }
        }
        self.append(session_id, last, position, at).await
    }

    /// Record the checkout point, which is exempt from the interval but must
    /// still be later than the last recorded point
    pub async fn append_checkout(
        &self,
        session_id: SessionId,
        position: Position,
        at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let last = self.store.last_point(session_id).await?;
        if last.as_ref().is_some_and(|last| at <= last.recorded_at) {
            return Ok(false);
        }
        self.append(session_id, last, position, at).await
    }

    async fn append(
        &self,
        session_id: SessionId,
        last: Option<PolylinePoint>,
        position: Position,
        at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let point = PolylinePoint {
            session_id,
            sequence: last.map_or(0, |p| p.sequence + 1),
            position,
            recorded_at: at,
        };
        self.retry
            .run("append polyline point", || self.store.append_point(&point))
            .await?;
        debug!(
            "Polyline point {} logged for session {}",
            point.sequence, session_id
        );
        Ok(true)
    }

    /// Recorded path of a session in sequence order
    pub async fn points_for(&self, session_id: SessionId) -> EngineResult<Vec<PolylinePoint>> {
        Ok(self.store.points(session_id).await?)
    }

    /// Drop points older than `cutoff`
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> EngineResult<u64> {
        let removed = self
            .retry
            .run("purge polyline points", || {
                self.store.purge_points_before(cutoff)
            })
            .await?;
        info!("Purged {} polyline points older than {}", removed, cutoff);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn log() -> PolylineLog<MemoryStore> {
        PolylineLog::new(
            Arc::new(MemoryStore::new()),
            Duration::seconds(POLYLINE_MIN_INTERVAL_SECS),
            RetryPolicy::none(),
        )
    }

    fn pos() -> Position {
        Position::new(17.45, 78.39).unwrap()
    }

    #[tokio::test]
    async fn test_first_point_is_always_recorded() {
        let log = log();
        let session = SessionId::new();
        assert!(log.maybe_append(session, pos(), t0()).await.unwrap());
        let points = log.points_for(session).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].sequence, 0);
    }

    #[tokio::test]
    async fn test_points_are_spaced_by_interval() {
        let log = log();
        let session = SessionId::new();

        let offsets = [0, 10, 59, 60, 61, 95, 119, 120, 500];
        let mut logged = Vec::new();
        for secs in offsets {
            if log
                .maybe_append(session, pos(), t0() + Duration::seconds(secs))
                .await
                .unwrap()
            {
                logged.push(secs);
            }
        }
        assert_eq!(logged, vec![0, 60, 120, 500]);

        let points = log.points_for(session).await.unwrap();
        let sequences: Vec<u32> = points.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        for pair in points.windows(2) {
            assert!(pair[1].recorded_at - pair[0].recorded_at >= Duration::seconds(60));
        }
    }

    #[tokio::test]
    async fn test_late_sample_does_not_append() {
        let log = log();
        let session = SessionId::new();
        assert!(log.maybe_append(session, pos(), t0()).await.unwrap());
        assert!(!log
            .maybe_append(session, pos(), t0() - Duration::seconds(120))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sessions_are_rate_limited_independently() {
        let log = log();
        let a = SessionId::new();
        let b = SessionId::new();
        assert!(log.maybe_append(a, pos(), t0()).await.unwrap());
        assert!(log.maybe_append(b, pos(), t0() + Duration::seconds(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkout_point_ignores_interval() {
        let log = log();
        let session = SessionId::new();
        log.maybe_append(session, pos(), t0()).await.unwrap();
        assert!(log
            .append_checkout(session, pos(), t0() + Duration::seconds(15))
            .await
            .unwrap());
        assert!(!log
            .append_checkout(session, pos(), t0() + Duration::seconds(15))
            .await
            .unwrap());
        assert_eq!(log.points_for(session).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let log = log();
        let session = SessionId::new();
        log.maybe_append(session, pos(), t0() - Duration::days(40)).await.unwrap();
        log.maybe_append(session, pos(), t0() - Duration::days(31)).await.unwrap();
        log.maybe_append(session, pos(), t0()).await.unwrap();

        let removed = log.purge_before(t0() - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(log.points_for(session).await.unwrap().len(), 1);
    }
}
