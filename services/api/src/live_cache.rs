//! Redis-held copy of the latest fix per session
//!
//! Written after every accepted update and read first by the live-location
//! endpoint. Entries are versioned by fix time, so a slower request carrying
//! an older fix never replaces a newer one. Checkout pins the closing fix
//! with a version no update can beat. The engine's session record stays
//! authoritative, so every cache failure is logged and treated as a miss.

use chrono::{DateTime, Utc};
use common::cache::RedisPool;
use engine::model::SessionId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Version of the fix written at checkout
const FINAL_VERSION: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedFix {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl CachedFix {
    fn version(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Clone)]
pub struct LiveLocationCache {
    pool: RedisPool,
    ttl_secs: u64,
}

impl LiveLocationCache {
    pub fn new(pool: RedisPool, ttl_secs: u64) -> Self {
        Self { pool, ttl_secs }
    }

    fn key(session_id: SessionId) -> String {
        format!("live:{session_id}")
    }

    /// Cache a fix of an active session unless a newer one is already there
    pub async fn put(&self, session_id: SessionId, fix: CachedFix) {
        self.write(session_id, fix, fix.version()).await;
    }

    /// Cache the closing fix of a session; later updates cannot replace it
    pub async fn put_final(&self, session_id: SessionId, fix: CachedFix) {
        self.write(session_id, fix, FINAL_VERSION).await;
    }

    async fn write(&self, session_id: SessionId, fix: CachedFix, version: i64) {
        if let Err(e) = self
            .pool
            .set_json_if_newer(&Self::key(session_id), &fix, version, self.ttl_secs)
            .await
        {
            warn!("Failed to cache live location of session {}: {}", session_id, e);
        }
    }

    pub async fn get(&self, session_id: SessionId) -> Option<CachedFix> {
        match self.pool.get_versioned_json(&Self::key(session_id)).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!("Failed to read cached live location of session {}: {}", session_id, e);
                None
            }
        }
    }
}
