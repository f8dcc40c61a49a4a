//! Application state shared across handlers

use std::sync::Arc;

use engine::Tracker;

use crate::live_cache::LiveLocationCache;

/// Application state shared across handlers, generic over the store so the
/// same router serves PostgreSQL in production and memory in tests
pub struct AppState<S> {
    pub tracker: Arc<Tracker<S>>,
    pub live_cache: Option<LiveLocationCache>,
    /// Age after which GPS points are purged by the cleanup endpoint
    pub gps_retention: chrono::Duration,
    pub idle_timeout: chrono::Duration,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            live_cache: self.live_cache.clone(),
            gps_retention: self.gps_retention,
            idle_timeout: self.idle_timeout,
        }
    }
}
