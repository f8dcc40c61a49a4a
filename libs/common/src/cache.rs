//! Redis cache for short-lived JSON values
//!
//! Values are stored as JSON strings with an optional TTL. The cache is never
//! the source of truth; callers fall back to the database on a miss or on
//! any [`CacheError`].

use redis::{AsyncCommands, Client, Script};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};

/// Replaces the entry only when the stored version is lower, in one step
const SET_IF_NEWER: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
    local ok, decoded = pcall(cjson.decode, current)
    if ok and type(decoded) == 'table' and tonumber(decoded['version']) ~= nil
        and tonumber(decoded['version']) >= tonumber(ARGV[2]) then
        return 0
    end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    version: i64,
    value: &'a T,
}

#[derive(Deserialize)]
struct Versioned<T> {
    value: T,
}

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Read `REDIS_URL`, defaulting to "redis://localhost:6379"
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        RedisConfig { url }
    }
}

/// Handle to a Redis server; every call takes a multiplexed connection
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    pub fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone()).map_err(CacheError::Connection)?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Connection)
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        if let Some(ttl) = ttl_seconds {
            let _: () = conn
                .set_ex(key, value, ttl)
                .await
                .map_err(CacheError::Command)?;
        } else {
            let _: () = conn.set(key, value).await.map_err(CacheError::Command)?;
        }

        Ok(())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        conn.get(key).await.map_err(CacheError::Command)
    }

    /// Store `value` as JSON under `key`
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> CacheResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded, ttl_seconds).await
    }

    /// Read and decode a JSON value; `None` on a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => {
                debug!("Cache miss for key {}", key);
                Ok(None)
            }
        }
    }

    /// Store `value` as JSON under `key` unless the entry already there was
    /// written with a version at least as high. Returns whether it was
    /// written.
    pub async fn set_json_if_newer<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        version: i64,
        ttl_seconds: u64,
    ) -> CacheResult<bool> {
        let encoded = serde_json::to_string(&VersionedRef { version, value })?;
        let mut conn = self.get_connection().await?;
        let written: i64 = Script::new(SET_IF_NEWER)
            .key(key)
            .arg(encoded)
            .arg(version)
            .arg(ttl_seconds.max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        if written == 0 {
            debug!("Kept newer cached value for key {}", key);
        }
        Ok(written == 1)
    }

    /// Read a value written by [`RedisPool::set_json_if_newer`]
    pub async fn get_versioned_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        Ok(self
            .get_json::<Versioned<T>>(key)
            .await?
            .map(|entry| entry.value))
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(key).await.map_err(CacheError::Command)?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        Ok(pong == "PONG")
    }
}
