//! In-process stand-in for a remote or durable tier
//!
//! Useful for tests and single-node deployments. Latency and failures can be
//! injected to exercise the tier manager's degradation paths.

use super::{TierStore, TierValue};
use crate::cache::entry::{expiry_from, remaining_until};
use crate::cache::invalidation::GlobPattern;
use crate::cache::types::{CacheValue, TierKind};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Map-backed [`TierStore`] with optional latency and failure injection
pub struct InMemoryTierStore {
    kind: TierKind,
    data: RwLock<HashMap<String, (CacheValue, DateTime<Utc>)>>,
    latency: Option<Duration>,
    failing: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryTierStore {
    pub fn new(kind: TierKind) -> Self {
        Self {
            kind,
            data: RwLock::new(HashMap::new()),
            latency: None,
            failing: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of read calls served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// True when a live value is stored under `key`
    pub async fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.data
            .read()
            .await
            .get(key)
            .map(|(_, expires_at)| *expires_at >= now)
            .unwrap_or(false)
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    async fn simulate(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::backing_store(
                self.kind.as_str(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TierStore for InMemoryTierStore {
    fn kind(&self) -> TierKind {
        self.kind
    }

    async fn read(&self, key: &str) -> Result<Option<TierValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let now = Utc::now();
        let data = self.data.read().await;
        Ok(data.get(key).and_then(|(value, expires_at)| {
            remaining_until(*expires_at, now)
                .map(|remaining| TierValue::new(value.clone(), Some(remaining)))
        }))
    }

    async fn write(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let expires_at = expiry_from(Utc::now(), ttl);
        self.data
            .write()
            .await
            .insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.simulate().await?;
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<u64> {
        self.simulate().await?;
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|key, _| !pattern.matches(key));
        Ok((before - data.len()) as u64)
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.simulate().await?;
        let now = Utc::now();
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, (_, expires_at)| *expires_at >= now);
        Ok((before - data.len()) as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        self.simulate().await?;
        Ok(true)
    }
}
