//! Neo4j-backed durable tier
//!
//! Entries are stored as `(:CacheEntry {key, value, expires_at, updated_at})`
//! nodes with the value serialized to a JSON string and `expires_at` in
//! epoch milliseconds. Neo4j has no native expiry, so reads filter on
//! `expires_at` and the maintenance task calls [`TierStore::purge_expired`].

use super::{TierStore, TierValue};
use crate::cache::config::Neo4jSettings;
use crate::cache::entry::{expiry_from, remaining_until};
use crate::cache::invalidation::GlobPattern;
use crate::cache::types::{CacheValue, TierKind};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use neo4rs::{query, ConfigBuilder, Graph, Query};
use std::time::Duration;
use tracing::{debug, info};

/// Durable tier persisted in Neo4j
#[derive(Clone)]
pub struct Neo4jTierStore {
    graph: Graph,
}

impl Neo4jTierStore {
    /// Connect to Neo4j and make sure the key constraint exists
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self> {
        info!(
            "Connecting durable tier to Neo4j at {} (database: {})",
            settings.uri, settings.database
        );

        let config = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .db(settings.database.as_str())
            .fetch_size(500)
            .max_connections(16)
            .build()
            .map_err(|e| CacheError::InvalidConfig(e.to_string()))?;

        let graph = Graph::connect(config).await.map_err(neo4j_error)?;

        let store = Self { graph };
        store.ensure_schema().await?;

        info!("Durable tier connected");
        Ok(store)
    }

    /// Wrap an existing connection pool
    pub fn from_graph(graph: Graph) -> Self {
        Self { graph }
    }

    /// Create the uniqueness constraint on `CacheEntry.key`
    pub async fn ensure_schema(&self) -> Result<()> {
        self.graph
            .run(query(
                "CREATE CONSTRAINT cache_entry_key IF NOT EXISTS \
                 FOR (e:CacheEntry) REQUIRE e.key IS UNIQUE",
            ))
            .await
            .map_err(neo4j_error)
    }

    /// Run a query ending in `RETURN count(*) AS removed`
    async fn count_removed(&self, q: Query) -> Result<u64> {
        let mut result = self.graph.execute(q).await.map_err(neo4j_error)?;

        let removed = match result.next().await.map_err(neo4j_error)? {
            Some(row) => row.get::<i64>("removed").unwrap_or(0),
            None => 0,
        };
        Ok(removed.max(0) as u64)
    }
}

fn neo4j_error(e: neo4rs::Error) -> CacheError {
    CacheError::backing_store(TierKind::Durable.as_str(), e)
}

#[async_trait]
impl TierStore for Neo4jTierStore {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    async fn read(&self, key: &str) -> Result<Option<TierValue>> {
        let now = Utc::now();
        let q = query(
            "MATCH (e:CacheEntry {key: $key}) \
             WHERE e.expires_at >= $now \
             RETURN e.value AS value, e.expires_at AS expires_at",
        )
        .param("key", key)
        .param("now", now.timestamp_millis());

        let mut result = self.graph.execute(q).await.map_err(neo4j_error)?;

        match result.next().await.map_err(neo4j_error)? {
            Some(row) => {
                let json: String = row
                    .get("value")
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;
                let expires_at: i64 = row
                    .get("expires_at")
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;

                let remaining = Utc
                    .timestamp_millis_opt(expires_at)
                    .single()
                    .and_then(|expires_at| remaining_until(expires_at, now));
                match remaining {
                    Some(remaining) => Ok(Some(TierValue::new(
                        serde_json::from_str(&json)?,
                        Some(remaining),
                    ))),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let q = query(
            "MERGE (e:CacheEntry {key: $key}) \
             SET e.value = $value, e.expires_at = $expires_at, e.updated_at = $now",
        )
        .param("key", key)
        .param("value", serde_json::to_string(value)?)
        .param("expires_at", expiry_from(now, ttl).timestamp_millis())
        .param("now", now.timestamp_millis());

        self.graph.run(q).await.map_err(neo4j_error)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let q = query(
            "MATCH (e:CacheEntry {key: $key}) \
             DETACH DELETE e \
             RETURN count(*) AS removed",
        )
        .param("key", key);

        Ok(self.count_removed(q).await? > 0)
    }

    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<u64> {
        let q = query(
            "MATCH (e:CacheEntry) WHERE e.key =~ $regex \
             DETACH DELETE e \
             RETURN count(*) AS removed",
        )
        .param("regex", pattern.to_regex());

        let removed = self.count_removed(q).await?;
        debug!("Deleted {} durable entries matching {}", removed, pattern);
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let q = query(
            "MATCH (e:CacheEntry) WHERE e.expires_at < $now \
             DETACH DELETE e \
             RETURN count(*) AS removed",
        )
        .param("now", Utc::now().timestamp_millis());

        self.count_removed(q).await
    }

    async fn health_check(&self) -> Result<bool> {
        debug!("Executing durable tier health check (RETURN 1)");
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(neo4j_error)?;
        Ok(true)
    }
}
