//! Nearest-neighbor lookup over embeddings of generated responses

use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;

/// Normalized dot product of two vectors. Vectors of different length or
/// with zero magnitude have similarity 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embedding paired with the cache key holding its response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIndexEntry {
    pub embedding: Vec<f64>,
    pub cached_response_ref: CacheKey,
    pub created_at: DateTime<Utc>,
}

/// Best neighbor at or above the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub key: CacheKey,
    pub similarity: f64,
}

/// Bounded, linearly scanned similarity index.
///
/// Entries are kept in insertion order so the oldest is dropped first once
/// `capacity` is reached.
pub struct SemanticMatcher {
    dimension: usize,
    threshold: f64,
    capacity: usize,
    index: RwLock<VecDeque<SemanticIndexEntry>>,
}

impl SemanticMatcher {
    pub fn new(dimension: usize, threshold: f64, capacity: usize) -> Self {
        Self {
            dimension,
            threshold,
            capacity: capacity.max(1),
            index: RwLock::new(VecDeque::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn check_dimension(&self, embedding: &[f64]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Index `embedding` for `key`, replacing any previous embedding for the
    /// same key. Returns the key dropped to stay within capacity.
    pub async fn insert(&self, key: &str, embedding: Vec<f64>) -> Result<Option<CacheKey>> {
        self.check_dimension(&embedding)?;

        let mut index = self.index.write().await;
        index.retain(|e| e.cached_response_ref != key);

        let evicted = if index.len() >= self.capacity {
            index.pop_front().map(|e| e.cached_response_ref)
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            debug!("Semantic index full, dropping {}", evicted);
        }

        index.push_back(SemanticIndexEntry {
            embedding,
            cached_response_ref: key.to_string(),
            created_at: Utc::now(),
        });
        Ok(evicted)
    }

    /// Most similar indexed entry with similarity at or above the threshold
    pub async fn find_nearest(&self, embedding: &[f64]) -> Result<Option<SemanticMatch>> {
        self.check_dimension(embedding)?;

        let index = self.index.read().await;
        let mut best: Option<SemanticMatch> = None;
        for entry in index.iter() {
            let similarity = cosine_similarity(embedding, &entry.embedding);
            if similarity < self.threshold {
                continue;
            }
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(SemanticMatch {
                    key: entry.cached_response_ref.clone(),
                    similarity,
                });
            }
        }
        Ok(best)
    }

    pub async fn remove(&self, key: &str) -> bool {
        let mut index = self.index.write().await;
        let before = index.len();
        index.retain(|e| e.cached_response_ref != key);
        index.len() != before
    }

    /// Drop every entry paired with one of `keys`
    pub async fn remove_keys(&self, keys: &[CacheKey]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        let mut index = self.index.write().await;
        let before = index.len();
        index.retain(|e| !keys.contains(&e.cached_response_ref));
        before - index.len()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.index
            .read()
            .await
            .iter()
            .any(|e| e.cached_response_ref == key)
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.index.write().await.clear();
    }
}
