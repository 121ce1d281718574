//! Request features and their vector encoding

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A named trait with its strength in the request (e.g. `woody: 0.8`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitWeight {
    pub name: String,
    pub weight: f64,
}

/// What a generation request is about.
///
/// Either weighted traits (encoded by a [`FeatureEncoder`]) or an explicit
/// embedding, or both; an explicit vector wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFeatures {
    pub traits: Vec<TraitWeight>,

    /// Precomputed embedding, used as-is
    pub vector: Option<Vec<f64>>,

    /// Expected token usage if this request has to be generated
    pub estimated_tokens: Option<u64>,
}

impl RequestFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Features from an explicit embedding
    pub fn from_vector(vector: Vec<f64>) -> Self {
        Self {
            vector: Some(vector),
            ..Default::default()
        }
    }

    pub fn with_trait(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.traits.push(TraitWeight {
            name: name.into(),
            weight,
        });
        self
    }

    pub fn with_vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    /// Up to `n` strongest positive traits, lowercased, strongest first.
    /// Equal weights order alphabetically.
    pub fn dominant_traits(&self, n: usize) -> Vec<String> {
        let mut ranked: Vec<(&TraitWeight, String)> = self
            .traits
            .iter()
            .filter(|t| t.weight > 0.0)
            .map(|t| (t, normalize(&t.name)))
            .collect();

        ranked.sort_by(|(a, a_name), (b, b_name)| {
            b.weight.total_cmp(&a.weight).then_with(|| a_name.cmp(b_name))
        });

        let mut dominant: Vec<String> = Vec::with_capacity(n);
        for (_, name) in ranked {
            if dominant.len() == n {
                break;
            }
            if !dominant.contains(&name) {
                dominant.push(name);
            }
        }
        dominant
    }

    /// Every trait name, lowercased, in request order without duplicates
    pub fn trait_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.traits.len());
        for t in &self.traits {
            let name = normalize(&t.name);
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Turns request features into a fixed-length vector
pub trait FeatureEncoder: Send + Sync {
    /// Length of every produced vector
    fn dimension(&self) -> usize;

    fn encode(&self, features: &RequestFeatures) -> Result<Vec<f64>>;
}

/// Feature hashing: each trait adds its signed weight to one of
/// `dimension` buckets, and the result is L2-normalised
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl FeatureEncoder for HashingEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, features: &RequestFeatures) -> Result<Vec<f64>> {
        if let Some(vector) = &features.vector {
            if vector.len() != self.dimension {
                return Err(CacheError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            return Ok(vector.clone());
        }

        let mut encoded = vec![0.0; self.dimension];
        for t in &features.traits {
            let mut hasher = DefaultHasher::new();
            normalize(&t.name).hash(&mut hasher);
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            encoded[bucket] += sign * t.weight;
        }

        let norm = encoded.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            for x in &mut encoded {
                *x /= norm;
            }
        }
        Ok(encoded)
    }
}
