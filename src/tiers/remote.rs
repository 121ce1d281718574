//! Redis-backed remote tier

use super::{ttl_millis, TierStore, TierValue};
use crate::cache::invalidation::GlobPattern;
use crate::cache::types::{CacheValue, TierKind};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

/// Remote tier shared between processes. Values are stored as JSON strings
/// with a native millisecond Redis expiry.
#[derive(Clone)]
pub struct RedisTierStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisTierStore {
    /// Connect to Redis at `redis_url`, namespacing every key under `prefix`
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(redis_error)?;
        let manager = ConnectionManager::new(client).await.map_err(redis_error)?;
        let prefix = prefix.into();

        info!("Redis remote tier connected (prefix: {})", prefix);
        Ok(Self { manager, prefix })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn redis_error(e: redis::RedisError) -> CacheError {
    CacheError::backing_store(TierKind::Remote.as_str(), e)
}

#[async_trait]
impl TierStore for RedisTierStore {
    fn kind(&self) -> TierKind {
        TierKind::Remote
    }

    async fn read(&self, key: &str) -> Result<Option<TierValue>> {
        let mut conn = self.manager.clone();
        let key = self.namespaced(key);
        let (raw, pttl): (Option<String>, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        let Some(json) = raw else {
            return Ok(None);
        };
        // -1: no expiry set
        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(Some(TierValue::new(serde_json::from_str(&json)?, remaining)))
    }

    async fn write(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(value)?;

        conn.pset_ex::<_, _, ()>(self.namespaced(key), json, ttl_millis(ttl))
            .await
            .map_err(redis_error)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: u64 = conn.del(self.namespaced(key)).await.map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<u64> {
        let mut conn = self.manager.clone();
        let namespaced = GlobPattern::new(self.namespaced(pattern.as_str()));
        let keys: Vec<String> = conn
            .keys(namespaced.to_redis_pattern())
            .await
            .map_err(redis_error)?;

        if keys.is_empty() {
            return Ok(0);
        }

        debug!("Deleting {} remote keys matching {}", keys.len(), pattern);
        let removed: u64 = conn.del(keys).await.map_err(redis_error)?;
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(pong == "PONG")
    }
}
